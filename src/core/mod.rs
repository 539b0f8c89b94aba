//! Core generation logic — app model, annotations, graph, resolution, emission.

pub mod annotation;
pub mod codegen;
pub mod error;
pub mod expr;
pub mod generator;
pub mod graph;
pub mod manifest;
pub mod output;
pub mod parser;
pub mod resolver;
pub mod types;
