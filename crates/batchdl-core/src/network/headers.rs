//! Parse HTTP response header lines collected by curl.

/// What a fetch needs from the response head.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ResponseHead {
    /// Status code of the final response (after redirects).
    pub status: Option<u32>,
    pub content_length: Option<u64>,
    /// (first byte, total size) from `Content-Range: bytes a-b/total`.
    pub content_range: Option<(u64, Option<u64>)>,
}

impl ResponseHead {
    /// Feed one raw header line. A status line starts a new response, so headers
    /// of redirect hops are discarded.
    pub fn push_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        if line.starts_with("HTTP/") {
            *self = ResponseHead {
                status: line
                    .split_whitespace()
                    .nth(1)
                    .and_then(|c| c.parse().ok()),
                ..Default::default()
            };
            return;
        }
        let Some((name, value)) = line.split_once(':') else {
            return;
        };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            self.content_length = value.parse::<u64>().ok();
        } else if name.eq_ignore_ascii_case("content-range") {
            self.content_range = parse_content_range(value);
        }
    }

    /// Full resource size implied by the head.
    pub fn total_size(&self) -> Option<u64> {
        match self.content_range {
            Some((_, total)) => total,
            None if self.status == Some(200) => self.content_length,
            None => None,
        }
    }
}

/// `bytes 100-199/1000` → (100, Some(1000)); `bytes 100-199/*` → (100, None).
fn parse_content_range(value: &str) -> Option<(u64, Option<u64>)> {
    let rest = value.strip_prefix("bytes")?.trim();
    let (range, total) = rest.split_once('/')?;
    let (start, _end) = range.split_once('-')?;
    let start = start.trim().parse().ok()?;
    let total = total.trim().parse().ok();
    Some((start, total))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head(lines: &[&str]) -> ResponseHead {
        let mut h = ResponseHead::default();
        for l in lines {
            h.push_line(l);
        }
        h
    }

    #[test]
    fn partial_content_reports_start_and_total() {
        let h = head(&[
            "HTTP/1.1 206 Partial Content\r\n",
            "Content-Length: 900\r\n",
            "Content-Range: bytes 100-999/1000\r\n",
        ]);
        assert_eq!(h.status, Some(206));
        assert_eq!(h.content_range, Some((100, Some(1000))));
        assert_eq!(h.total_size(), Some(1000));
    }

    #[test]
    fn full_response_uses_content_length() {
        let h = head(&["HTTP/1.1 200 OK", "Content-Length: 12345"]);
        assert_eq!(h.total_size(), Some(12345));
        assert_eq!(h.content_range, None);
    }

    #[test]
    fn redirect_hops_are_discarded() {
        let h = head(&[
            "HTTP/1.1 302 Found",
            "Content-Length: 0",
            "Location: /elsewhere",
            "HTTP/1.1 200 OK",
            "Content-Length: 42",
        ]);
        assert_eq!(h.status, Some(200));
        assert_eq!(h.content_length, Some(42));
    }

    #[test]
    fn unknown_total_in_content_range() {
        assert_eq!(parse_content_range("bytes 5-9/*"), Some((5, None)));
        assert_eq!(parse_content_range("bytes */100"), None);
    }
}
