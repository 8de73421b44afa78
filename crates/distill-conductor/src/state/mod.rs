pub mod machine;
pub mod reset;
