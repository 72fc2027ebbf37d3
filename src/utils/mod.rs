pub mod sse;
pub mod test_support;
