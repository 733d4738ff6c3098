/// Adds transparency ([RFC 5321, section 4.5.2](https://tools.ietf.org/html/rfc5321#section-4.5.2))
///
/// Every line starting with a `.` gets one more. The state survives between
/// frames, so the input can be fed in pieces.
#[derive(Default, Clone, Copy, Debug)]
pub(crate) struct TransparencyCodec {
    escape_count: u8,
}

impl TransparencyCodec {
    pub(crate) fn new() -> Self {
        TransparencyCodec::default()
    }

    pub(crate) fn encode(&mut self, frame: &[u8], buf: &mut Vec<u8>) {
        let mut start = 0;
        for (idx, byte) in frame.iter().enumerate() {
            match self.escape_count {
                0 => self.escape_count = if *byte == b'\r' { 1 } else { 0 },
                1 => {
                    self.escape_count = match *byte {
                        b'\n' => 2,
                        b'\r' => 1,
                        _ => 0,
                    }
                }
                2 => {
                    self.escape_count = match *byte {
                        b'.' => 3,
                        b'\r' => 1,
                        _ => 0,
                    }
                }
                _ => unreachable!(),
            }
            if self.escape_count == 3 {
                self.escape_count = 0;
                buf.extend_from_slice(&frame[start..idx]);
                buf.push(b'.');
                start = idx;
            }
        }
        buf.extend_from_slice(&frame[start..]);
    }

    /// Completes the last line if needed and writes the end-of-data line
    pub(crate) fn finish(&mut self, buf: &mut Vec<u8>) {
        match self.escape_count {
            0 => buf.extend_from_slice(b"\r\n.\r\n"),
            1 => buf.extend_from_slice(b"\n.\r\n"),
            2 => buf.extend_from_slice(b".\r\n"),
            _ => unreachable!(),
        }
        self.escape_count = 0;
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::TransparencyCodec;

    #[test]
    fn test_codec() {
        let mut codec = TransparencyCodec::new();
        let mut buf: Vec<u8> = vec![];

        codec.encode(b"test\r\n", &mut buf);
        codec.encode(b".\r\n", &mut buf);
        codec.encode(b"\r\ntest", &mut buf);
        codec.encode(b"te\r\n.\r\nst", &mut buf);
        codec.encode(b"test", &mut buf);
        codec.encode(b"test.", &mut buf);
        codec.encode(b"test\n", &mut buf);
        codec.encode(b".test\n", &mut buf);
        codec.encode(b"test", &mut buf);
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "test\r\n..\r\n\r\ntestte\r\n..\r\nsttesttest.test\n.test\ntest"
        );
    }

    #[test]
    fn test_codec_doubles_leading_dots() {
        let mut codec = TransparencyCodec::new();
        let mut buf = vec![];

        codec.encode(b"a\r\n..b\r\n\r\r\n.c", &mut buf);
        assert_eq!(buf, b"a\r\n...b\r\n\r\r\n..c");
    }

    #[test]
    fn test_finish() {
        for (input, expected) in [
            (&b"body"[..], &b"body\r\n.\r\n"[..]),
            (b"body\r", b"body\r\n.\r\n"),
            (b"body\r\n", b"body\r\n.\r\n"),
            (b"body\r\n.", b"body\r\n..\r\n.\r\n"),
        ] {
            let mut codec = TransparencyCodec::new();
            let mut buf = vec![];
            codec.encode(input, &mut buf);
            codec.finish(&mut buf);
            assert_eq!(buf, expected);
        }
    }
}
