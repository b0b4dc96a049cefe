mod error;
mod hosts;
mod landing;
mod logging;
mod pool;
mod redirect;
mod runtime;
mod types;
mod webdriver;

pub use runtime::run;
