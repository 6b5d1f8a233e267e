use async_trait::async_trait;

use crate::error::Result;

/// Outbound HTTP seam. The pipeline only ever issues GETs.
///
/// A non-2xx status is not an error at this level; callers decide what a status means.
#[async_trait]
pub trait HttpClientPort: Send + Sync {
    async fn get(&self, url: &str) -> Result<HttpGetResult>;
}

#[derive(Clone, Debug)]
pub struct HttpGetResult {
    pub status: u16,
    pub bytes: Vec<u8>,
}

impl HttpGetResult {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_200_is_ok_and_body_decodes_lossily() {
        let ok = HttpGetResult { status: 200, bytes: b"Index of /".to_vec() };
        assert!(ok.is_ok());
        assert_eq!(ok.text(), "Index of /");

        let moved = HttpGetResult { status: 301, bytes: vec![b'a', 0xff] };
        assert!(!moved.is_ok());
        assert_eq!(moved.text(), "a\u{fffd}");
    }
}
