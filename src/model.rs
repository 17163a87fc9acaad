pub mod attributes;
pub mod bounds;
pub mod metadata;
pub mod options;
pub mod point;
pub mod vector3;
