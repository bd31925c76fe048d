//! A local TCP server answering each accepted connection with the next
//! canned HTTP/1.1 response and recording the raw requests it saw.

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub struct ScriptedServer {
    pub base_url: String,
    requests: Arc<Mutex<Vec<String>>>,
    join: JoinHandle<()>,
}

impl ScriptedServer {
    pub async fn start<B: Into<String>>(responses: Vec<(u16, B)>) -> Self {
        let responses: Vec<(u16, String)> =
            responses.into_iter().map(|(status, body)| (status, body.into())).collect();
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind server");
        let addr = listener.local_addr().expect("server addr");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&requests);
        let join = tokio::spawn(async move {
            for (status, body) in responses {
                let (mut stream, _) = listener.accept().await.expect("accept");
                let request = read_http_request(&mut stream).await;
                captured.lock().expect("capture lock").push(request);
                let response = format!(
                    "HTTP/1.1 {status} Status\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                stream
                    .write_all(response.as_bytes())
                    .await
                    .expect("write response");
                let _ = stream.shutdown().await;
            }
        });
        Self {
            base_url: format!("http://{addr}"),
            requests,
            join,
        }
    }

    /// Wait for every scripted response to be served and return the requests.
    pub async fn finish(self) -> Vec<String> {
        self.join.await.expect("server task");
        let requests = self.requests.lock().expect("capture lock").clone();
        requests
    }
}

async fn read_http_request(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut scratch = [0u8; 4096];
    loop {
        match stream.read(&mut scratch).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                buf.extend_from_slice(&scratch[..n]);
                if let Some(headers_end) = buf
                    .windows(4)
                    .position(|w| w == b"\r\n\r\n")
                    .map(|p| p + 4)
                {
                    let body_len = content_length(&buf[..headers_end]).unwrap_or(0);
                    while buf.len() < headers_end + body_len {
                        match stream.read(&mut scratch).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => buf.extend_from_slice(&scratch[..n]),
                        }
                    }
                    break;
                }
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn content_length(headers: &[u8]) -> Option<usize> {
    String::from_utf8_lossy(headers).split("\r\n").find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim()
            .eq_ignore_ascii_case("content-length")
            .then(|| value.trim().parse().ok())
            .flatten()
    })
}
