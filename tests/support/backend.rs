//! Scripted stand-in for the model management service.

use std::{
    collections::HashMap,
    io::{Read, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: String,
    /// Path including any query string.
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Clone)]
struct Route {
    status: u16,
    body: String,
    delay: Duration,
}

#[derive(Default)]
struct State {
    routes: HashMap<(String, String), Route>,
    requests: Vec<RecordedRequest>,
}

/// Loopback HTTP server answering each connection on its own thread.
pub struct FakeBackend {
    addr: SocketAddr,
    state: Arc<Mutex<State>>,
}

impl FakeBackend {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake backend");
        let addr = listener.local_addr().expect("fake backend addr");
        let state = Arc::new(Mutex::new(State::default()));
        let shared = Arc::clone(&state);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else {
                    continue;
                };
                let state = Arc::clone(&shared);
                thread::spawn(move || handle(stream, &state));
            }
        });
        Self { addr, state }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Answer `method path` (query ignored) with `status` and a JSON body.
    pub fn route(&self, method: &str, path: &str, status: u16, body: &str) {
        self.route_delayed(method, path, status, body, Duration::ZERO);
    }

    pub fn route_delayed(&self, method: &str, path: &str, status: u16, body: &str, delay: Duration) {
        self.lock().routes.insert(
            (method.to_string(), path.to_string()),
            Route {
                status,
                body: body.to_string(),
                delay,
            },
        );
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().requests.clone()
    }

    pub fn requests_to(&self, method: &str, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.method == method && route_path(&request.path) == path)
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }
}

fn route_path(path: &str) -> &str {
    path.split('?').next().unwrap_or(path)
}

fn handle(mut stream: TcpStream, state: &Mutex<State>) {
    let Some(request) = read_request(&mut stream) else {
        return;
    };
    let route = {
        let mut state = state.lock().unwrap_or_else(|err| err.into_inner());
        let key = (request.method.clone(), route_path(&request.path).to_string());
        let route = state.routes.get(&key).cloned();
        state.requests.push(request);
        route
    };
    let route = route.unwrap_or(Route {
        status: 404,
        body: r#"{"error": "No such route"}"#.to_string(),
        delay: Duration::ZERO,
    });
    if !route.delay.is_zero() {
        thread::sleep(route.delay);
    }
    let response = format!(
        "HTTP/1.1 {} Scripted\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        route.status,
        route.body.len(),
        route.body
    );
    let _ = stream.write_all(response.as_bytes());
}

fn read_request(stream: &mut TcpStream) -> Option<RecordedRequest> {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    let header_end = loop {
        let read = stream.read(&mut buf).ok()?;
        if read == 0 {
            return None;
        }
        data.extend_from_slice(&buf[..read]);
        if let Some(end) = data.windows(4).position(|window| window == b"\r\n\r\n") {
            break end;
        }
    };

    let head = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect::<Vec<_>>();
    let length = headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.parse::<usize>().ok())
        .unwrap_or(0);

    let body_start = header_end + 4;
    while data.len() < body_start + length {
        let read = stream.read(&mut buf).ok()?;
        if read == 0 {
            break;
        }
        data.extend_from_slice(&buf[..read]);
    }
    let body_end = data.len().min(body_start + length);
    let body = String::from_utf8_lossy(&data[body_start..body_end]).into_owned();
    Some(RecordedRequest {
        method,
        path,
        headers,
        body,
    })
}
