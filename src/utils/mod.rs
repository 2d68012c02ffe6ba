pub mod http;
pub mod logging;
#[cfg(test)]
pub mod test_utils;
pub mod url;
