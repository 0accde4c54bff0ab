mod body;
pub mod profiling;
