pub mod alerts;
pub mod sections;
pub mod status;
