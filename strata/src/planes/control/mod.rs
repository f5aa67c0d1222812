pub mod helpers;
pub mod invalidator;
pub mod strategy;
