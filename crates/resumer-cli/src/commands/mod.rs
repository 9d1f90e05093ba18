pub mod record;
pub mod replay;
pub mod status;
