//! Cross-crate scenarios run against a scripted local HTTP server.

#[cfg(test)]
mod support;
