//! Benchmarks for udsmux live under `benches/`.
