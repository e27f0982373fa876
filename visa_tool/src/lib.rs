#[macro_use]
extern crate dlopen_derive;

use std::io;

use thiserror::Error;

pub use visa::{VisaError, VisaResult};

pub mod app;
pub mod escape;
pub mod preview;
pub mod scpi;
pub mod visa;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Visa(VisaError),
    #[error("Cannot load VISA library: {0}")]
    Library(String),
    #[error("Invalid binary block: {0}")]
    InvalidBinaryBlock(String),
    #[error("Argument Error: {0}")]
    Argument(anyhow::Error),
    #[error("IO Error occurred: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub fn argument<T: Into<anyhow::Error>>(err: T) -> Self {
        Self::Argument(err.into())
    }

    pub fn invalid_block<T: Into<String>>(msg: T) -> Self {
        Self::InvalidBinaryBlock(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
