//! Line protocol on stdin/stdout.
//!
//! One principal per input line, one `OK`/`ERR` per output line, flushed
//! immediately so the caller never waits on a buffered answer.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{error, info, warn};

use crate::application::authorize::MembershipCheck;
use crate::application::handle_request::HandleRequestUseCase;

/// Longest request line accepted, excluding the newline.
pub const MAX_REQUEST_LEN: usize = 6400;

/// One unit read from the input stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// A complete line without its terminator.
    Line(String),
    /// A line longer than [`MAX_REQUEST_LEN`], or a final line with no
    /// newline.  The offending bytes have been consumed.
    Malformed,
    /// End of input.
    Eof,
}

pub struct RequestReader<R> {
    inner: R,
}

impl<R: AsyncBufRead + Unpin> RequestReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Reads the next request.
    ///
    /// # Errors
    ///
    /// Propagates read errors from the underlying stream.
    pub async fn next_request(&mut self) -> io::Result<Request> {
        let mut line = Vec::new();
        let mut overlong = false;

        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                return Ok(if line.is_empty() && !overlong {
                    Request::Eof
                } else {
                    Request::Malformed
                });
            }

            let (chunk, terminated) = match available.iter().position(|&b| b == b'\n') {
                Some(end) => (&available[..end], true),
                None => (available, false),
            };
            if !overlong && line.len() + chunk.len() <= MAX_REQUEST_LEN {
                line.extend_from_slice(chunk);
            } else {
                overlong = true;
                line.clear();
            }
            let used = chunk.len() + usize::from(terminated);
            self.inner.consume(used);

            if terminated {
                return Ok(if overlong {
                    Request::Malformed
                } else {
                    Request::Line(String::from_utf8_lossy(&line).into_owned())
                });
            }
        }
    }
}

pub struct ResponseWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> ResponseWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Writes `response` and a newline, then flushes.
    ///
    /// # Errors
    ///
    /// Propagates write errors from the underlying stream.
    pub async fn write_line(&mut self, response: &str) -> io::Result<()> {
        let mut out = Vec::with_capacity(response.len() + 1);
        out.extend_from_slice(response.as_bytes());
        out.push(b'\n');
        self.inner.write_all(&out).await?;
        self.inner.flush().await
    }
}

/// Why the request loop stopped.
#[derive(Debug)]
pub enum LoopExit {
    /// Input ended; a final `ERR` was written.
    EndOfInput,
    /// The shutdown sentinel arrived; nothing was written for it.
    Shutdown,
    /// Reading failed; a final `ERR` was written.
    ReadFailed(io::Error),
}

/// Answers requests one at a time until input ends, fails, or asks for
/// shutdown.
///
/// # Errors
///
/// Only write failures are returned; read failures end the loop with
/// [`LoopExit::ReadFailed`].
pub async fn run_request_loop<R, W, M>(
    reader: &mut RequestReader<R>,
    writer: &mut ResponseWriter<W>,
    handler: &HandleRequestUseCase<'_, M>,
) -> io::Result<LoopExit>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    M: MembershipCheck,
{
    loop {
        let line = match reader.next_request().await {
            Ok(Request::Line(line)) => line,
            Ok(Request::Malformed) => {
                warn!("request line too long or unterminated");
                writer.write_line("ERR").await?;
                continue;
            }
            Ok(Request::Eof) => {
                writer.write_line("ERR").await?;
                return Ok(LoopExit::EndOfInput);
            }
            Err(e) => {
                error!("reading request failed: {e}");
                writer.write_line("ERR").await?;
                return Ok(LoopExit::ReadFailed(e));
            }
        };

        let Some(response) = handler.handle(&line).await.response_line() else {
            return Ok(LoopExit::Shutdown);
        };
        info!("{response} for {line}");
        writer.write_line(response).await?;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::authorize::{AuthorizeUseCase, MockMembershipCheck};
    use kerb_ldap_core::{parse_group_list, DomainResolver, GroupListEncoding};
    use tokio::io::BufReader;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_reads_lines_then_eof() {
        // Arrange – the second line arrives in two reads
        let mock = Builder::new().read(b"jdoe@CORP\nCORP%5C").read(b"asmith\n").build();
        let mut reader = RequestReader::new(BufReader::new(mock));

        // Act / Assert
        assert_eq!(reader.next_request().await.unwrap(), Request::Line("jdoe@CORP".to_string()));
        assert_eq!(reader.next_request().await.unwrap(), Request::Line("CORP%5Casmith".to_string()));
        assert_eq!(reader.next_request().await.unwrap(), Request::Eof);
    }

    #[tokio::test]
    async fn test_overlong_line_is_discarded_up_to_newline() {
        // Arrange
        let mut input = vec![b'a'; MAX_REQUEST_LEN + 10];
        input.extend_from_slice(b"\njdoe\n");
        let mock = Builder::new().read(&input).build();
        let mut reader = RequestReader::new(BufReader::new(mock));

        // Act / Assert
        assert_eq!(reader.next_request().await.unwrap(), Request::Malformed);
        assert_eq!(reader.next_request().await.unwrap(), Request::Line("jdoe".to_string()));
    }

    #[tokio::test]
    async fn test_line_at_limit_is_accepted() {
        let mut input = vec![b'u'; MAX_REQUEST_LEN];
        input.push(b'\n');
        let mock = Builder::new().read(&input).build();
        let mut reader = RequestReader::new(BufReader::new(mock));

        let request = reader.next_request().await.unwrap();

        assert!(matches!(request, Request::Line(line) if line.len() == MAX_REQUEST_LEN));
    }

    #[tokio::test]
    async fn test_unterminated_final_line_is_malformed() {
        let mock = Builder::new().read(b"jdoe").build();
        let mut reader = RequestReader::new(BufReader::new(mock));

        assert_eq!(reader.next_request().await.unwrap(), Request::Malformed);
        assert_eq!(reader.next_request().await.unwrap(), Request::Eof);
    }

    #[tokio::test]
    async fn test_read_error_is_propagated() {
        let mock = Builder::new()
            .read_error(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
            .build();
        let mut reader = RequestReader::new(BufReader::new(mock));

        let result = reader.next_request().await;

        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_write_line_appends_newline() {
        let mock = Builder::new().write(b"OK\n").write(b"ERR\n").build();
        let mut writer = ResponseWriter::new(mock);

        writer.write_line("OK").await.unwrap();
        writer.write_line("ERR").await.unwrap();
    }

    #[tokio::test]
    async fn test_request_loop_answers_until_eof() {
        // Arrange
        let rules = parse_group_list("Staff", GroupListEncoding::Plain).unwrap();
        let mut membership = MockMembershipCheck::new();
        membership
            .expect_is_member()
            .returning(|principal, _| principal.user == "jdoe");
        let handler = HandleRequestUseCase::new(
            DomainResolver::new(&[], None),
            AuthorizeUseCase::new(&rules, membership),
        );
        let input = Builder::new().read(b"jdoe\nasmith\n").build();
        let output = Builder::new().write(b"OK\n").write(b"ERR\n").write(b"ERR\n").build();
        let mut reader = RequestReader::new(BufReader::new(input));
        let mut writer = ResponseWriter::new(output);

        // Act
        let exit = run_request_loop(&mut reader, &mut writer, &handler).await.unwrap();

        // Assert
        assert!(matches!(exit, LoopExit::EndOfInput));
    }

    #[tokio::test]
    async fn test_request_loop_stops_silently_on_sentinel() {
        let rules = parse_group_list("Staff", GroupListEncoding::Plain).unwrap();
        let mut membership = MockMembershipCheck::new();
        membership.expect_is_member().never();
        let handler = HandleRequestUseCase::new(
            DomainResolver::new(&[], None),
            AuthorizeUseCase::new(&rules, membership),
        );
        let input = Builder::new().read(b"QQ@QQ\njdoe\n").build();
        let output = Builder::new().build();
        let mut reader = RequestReader::new(BufReader::new(input));
        let mut writer = ResponseWriter::new(output);

        let exit = run_request_loop(&mut reader, &mut writer, &handler).await.unwrap();

        assert!(matches!(exit, LoopExit::Shutdown));
    }
}
