//! Scripted HTTP/1.1 endpoint on a local port, used by the transport tests.
//!
//! Each route is a path prefix with a queue of raw responses; the last response of a route
//! repeats once its queue is drained. Every connection serves one request and is closed.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

type Routes = Vec<(&'static str, VecDeque<String>)>;

pub struct HttpStub {
	addr: SocketAddr,
	requests: Arc<Mutex<Vec<String>>>,
}

impl HttpStub {
	pub async fn start(routes: Vec<(&'static str, Vec<String>)>) -> Self {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		let requests = Arc::new(Mutex::new(Vec::new()));
		let mut routes: Routes = routes
			.into_iter()
			.map(|(prefix, responses)| (prefix, VecDeque::from(responses)))
			.collect();

		let seen = requests.clone();
		tokio::spawn(async move {
			while let Ok((mut socket, _)) = listener.accept().await {
				let Some(request_line) = read_request(&mut socket).await else {
					continue;
				};
				seen.lock().unwrap().push(request_line.clone());
				let response = next_response(&mut routes, &request_line);
				let _ = socket.write_all(response.as_bytes()).await;
				let _ = socket.shutdown().await;
			}
		});

		Self { addr, requests }
	}

	pub fn url(&self, path: &str) -> String {
		format!("http://{}{}", self.addr, path)
	}

	/// Request lines (`GET /path?query HTTP/1.1`) received so far, in order.
	pub fn requests(&self) -> Vec<String> {
		self.requests.lock().unwrap().clone()
	}

	/// Request lines whose path starts with `prefix`.
	pub fn requests_to(&self, prefix: &str) -> Vec<String> {
		self.requests()
			.into_iter()
			.filter(|line| request_path(line).starts_with(prefix))
			.collect()
	}
}

/// A complete response that closes the connection afterwards.
pub fn response(status: &str, content_type: &str, body: &str) -> String {
	format!(
		"HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
		status,
		content_type,
		body.len(),
		body
	)
}

fn request_path(request_line: &str) -> &str {
	request_line.split_whitespace().nth(1).unwrap_or("")
}

fn next_response(routes: &mut Routes, request_line: &str) -> String {
	let path = request_path(request_line);
	let queue = routes
		.iter_mut()
		.find(|(prefix, _)| path.starts_with(prefix))
		.map(|(_, queue)| queue);
	match queue {
		Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
		Some(queue) => queue.front().cloned().unwrap_or_default(),
		None => response("404 Not Found", "text/plain", "no route"),
	}
}

/// Read the head and any `Content-Length` body of one request; return its request line.
async fn read_request(socket: &mut TcpStream) -> Option<String> {
	let mut buf = Vec::new();
	let mut chunk = [0u8; 4096];
	let head_end = loop {
		let n = socket.read(&mut chunk).await.ok()?;
		if n == 0 {
			return None;
		}
		buf.extend_from_slice(&chunk[..n]);
		if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
			break pos + 4;
		}
	};

	let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
	let content_length = head
		.lines()
		.filter_map(|line| line.split_once(':'))
		.find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
		.and_then(|(_, value)| value.trim().parse::<usize>().ok())
		.unwrap_or(0);
	while buf.len() < head_end + content_length {
		let n = socket.read(&mut chunk).await.ok()?;
		if n == 0 {
			break;
		}
		buf.extend_from_slice(&chunk[..n]);
	}

	head.lines().next().map(str::to_string)
}
