pub mod corpus;
pub mod init;
pub mod process;
