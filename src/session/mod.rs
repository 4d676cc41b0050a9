pub mod session;

#[cfg(test)]
mod session_test;

pub use session::ExporterSession;
