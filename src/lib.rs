// stages, in pipeline order
// - input: validate the genotype file (existence, size)
// - filter: remove low quality records (VCF, HapMap)
// - sequence: genotype -> one SNP sequence per sample, check length
// - alignment: sequences -> PHYLIP alignment, outgroup lookup
// - tree: ML tree (+ optional bootstrap), rename outputs

pub mod alignment;
pub mod args;
pub mod config;
pub mod filter;
pub mod input;
pub mod pipeline;
pub mod sequence;
pub mod tools;
pub mod tree;
