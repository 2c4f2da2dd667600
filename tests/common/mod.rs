//! Shared scaffolding for scenario-level tests: NZB fixture builders, a yEnc
//! test encoder, and a scriptable fake NNTP server.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

/// Mirrors `yenc::encode` from the crate's own test module — yEnc encoding
/// isn't exposed as a public function, only decoding is, so article bodies
/// for these tests are hand-built the same way.
pub fn yenc_encode(data: &[u8]) -> String {
    let mut out = String::new();
    for &b in data {
        let enc = b.wrapping_add(42);
        match enc {
            0x00 | 0x0A | 0x0D | b'=' => {
                out.push('=');
                out.push(enc.wrapping_add(64) as char);
            }
            _ => out.push(enc as char),
        }
    }
    out
}

/// Build a single-segment `=ybegin`/`=yend` article body for `data`.
pub fn yenc_article_single(name: &str, data: &[u8]) -> String {
    let encoded = yenc_encode(data);
    format!(
        "=ybegin line=128 size={} name={name}\r\n{encoded}\r\n=yend size={}\r\n",
        data.len(),
        data.len()
    )
}

/// Build one part of a multi-part yEnc posting.
pub fn yenc_article_part(
    name: &str,
    total_size: usize,
    part: u32,
    begin: usize,
    data: &[u8],
) -> String {
    let encoded = yenc_encode(data);
    let end = begin + data.len();
    format!(
        "=ybegin part={part} line=128 size={total_size} name={name}\r\n=ypart begin={begin_1} end={end}\r\n{encoded}\r\n=yend size={} part={part}\r\n",
        data.len(),
        begin_1 = begin + 1,
    )
}

/// Description of one article a fake server should be able to serve.
#[derive(Clone)]
pub struct ScriptedArticle {
    pub message_id: String,
    pub body: String,
    /// Artificial delay before responding, used to force a deterministic
    /// out-of-order completion sequence across concurrent connections.
    pub delay_ms: u64,
}

impl ScriptedArticle {
    pub fn new(message_id: &str, body: String) -> Self {
        Self {
            message_id: message_id.to_string(),
            body,
            delay_ms: 0,
        }
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }
}

/// Builds a flat NZB XML document: one `<file>` per entry, segments given in
/// the order they should appear in the descriptor (not necessarily message
/// order), subject lines carrying the real filename so recovery succeeds.
pub struct NzbBuilder {
    password: Option<String>,
    files: Vec<(String, Vec<(u64, u32, String)>)>,
}

impl NzbBuilder {
    pub fn new() -> Self {
        Self {
            password: None,
            files: Vec::new(),
        }
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    /// Add a file. `segments` is `(bytes, number, message_id)` triples, given
    /// in the order the NZB should list them (callers can shuffle this to
    /// test out-of-order delivery).
    pub fn add_file(mut self, subject: &str, segments: Vec<(u64, u32, String)>) -> Self {
        self.files.push((subject.to_string(), segments));
        self
    }

    pub fn build(self) -> String {
        let mut out = String::from(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        out.push('\n');
        out.push_str(r#"<nzb xmlns="http://www.newzbin.com/DTD/2003/nzb">"#);
        out.push('\n');
        if let Some(password) = &self.password {
            out.push_str("  <head>\n");
            out.push_str(&format!("    <meta type=\"password\">{password}</meta>\n"));
            out.push_str("  </head>\n");
        }
        for (subject, segments) in &self.files {
            out.push_str(&format!("  <file subject=\"{subject}\">\n"));
            out.push_str("    <groups><group>alt.binaries.test</group></groups>\n");
            out.push_str("    <segments>\n");
            for (bytes, number, message_id) in segments {
                out.push_str(&format!(
                    "      <segment bytes=\"{bytes}\" number=\"{number}\">{message_id}</segment>\n"
                ));
            }
            out.push_str("    </segments>\n");
            out.push_str("  </file>\n");
        }
        out.push_str("</nzb>\n");
        out
    }
}

/// A fake NNTP server that answers `ARTICLE <id>` requests from a fixed
/// table of scripted bodies, optionally failing a configured set of
/// message-ids with a permanent error response every time they're requested.
pub struct FakeNntpServer {
    pub addr: SocketAddr,
}

impl FakeNntpServer {
    /// Start a server serving `articles`. Requests for ids in `always_fail`
    /// get a permanent `430 no such article` response instead of their body,
    /// every time (simulating a segment that can never be fetched).
    pub async fn start(articles: Vec<ScriptedArticle>, always_fail: Vec<String>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let bodies: HashMap<String, (String, u64)> = articles
            .into_iter()
            .map(|a| (a.message_id, (a.body, a.delay_ms)))
            .collect();
        let bodies = Arc::new(bodies);
        let always_fail: Arc<Vec<String>> = Arc::new(always_fail);

        tokio::spawn(async move {
            loop {
                let (socket, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => break,
                };
                let bodies = Arc::clone(&bodies);
                let always_fail = Arc::clone(&always_fail);
                tokio::spawn(handle_connection(socket, bodies, always_fail));
            }
        });

        Self { addr }
    }
}

async fn handle_connection(
    mut socket: tokio::net::TcpStream,
    bodies: Arc<HashMap<String, (String, u64)>>,
    always_fail: Arc<Vec<String>>,
) {
    let _ = socket
        .write_all(b"200 server ready posting ok\r\n")
        .await;

    let (reader, mut writer) = socket.split();
    let mut reader = BufReader::new(reader);

    loop {
        let mut line = String::new();
        let n = match reader.read_line(&mut line).await {
            Ok(n) => n,
            Err(_) => break,
        };
        if n == 0 {
            break;
        }
        let line = line.trim_end();

        if let Some(rest) = line.strip_prefix("ARTICLE <") {
            let id = rest.trim_end_matches('>');
            if always_fail.iter().any(|f| f == id) {
                let _ = writer
                    .write_all(format!("430 no such article {id}\r\n").as_bytes())
                    .await;
                continue;
            }
            match bodies.get(id) {
                Some((body, delay_ms)) => {
                    if *delay_ms > 0 {
                        tokio::time::sleep(std::time::Duration::from_millis(*delay_ms)).await;
                    }
                    let mut response = format!("220 0 <{id}> article retrieved\r\n\r\n");
                    for body_line in body.lines() {
                        let stuffed = if body_line.starts_with('.') {
                            format!(".{body_line}")
                        } else {
                            body_line.to_string()
                        };
                        response.push_str(&stuffed);
                        response.push_str("\r\n");
                    }
                    response.push_str(".\r\n");
                    let _ = writer.write_all(response.as_bytes()).await;
                }
                None => {
                    let _ = writer
                        .write_all(format!("430 no such article {id}\r\n").as_bytes())
                        .await;
                }
            }
        } else if line.starts_with("QUIT") {
            let _ = writer.write_all(b"205 bye\r\n").await;
            break;
        } else {
            let _ = writer.write_all(b"500 command not recognized\r\n").await;
        }
    }
}

/// Guards a shared counter so multiple test helpers can track call counts
/// without each needing its own `Arc<Mutex<_>>` boilerplate at the call site.
pub type Counter = Arc<Mutex<usize>>;
