// Core modules implementing wire encodings and error modeling.
pub mod edn;
pub mod error;
pub mod wire;
