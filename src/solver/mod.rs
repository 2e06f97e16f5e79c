pub mod replay;
pub mod synthesis;
