pub mod product;
pub mod rule;
