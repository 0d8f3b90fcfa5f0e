use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Canned answer for one method/path pair.
#[derive(Debug, Clone)]
pub struct StubRoute {
    pub method: &'static str,
    pub path: &'static str,
    pub status: u16,
    pub body: String,
}

impl StubRoute {
    pub fn new(method: &'static str, path: &'static str, status: u16, body: &str) -> Self {
        Self {
            method,
            path,
            status,
            body: body.to_string(),
        }
    }
}

/// One request as the stub saw it.
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct Received {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub authorization: Option<String>,
    pub body: String,
}

pub struct MealieStub {
    pub base_url: String,
    received: Arc<Mutex<Vec<Received>>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MealieStub {
    pub fn spawn(routes: Vec<StubRoute>) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start mealie stub server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}");

        let received = Arc::new(Mutex::new(Vec::new()));
        let journal = received.clone();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let mut request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let method = method_name(request.method()).to_string();
                let url = request.url().to_string();
                let (path, query) = match url.split_once('?') {
                    Some((path, query)) => (path.to_string(), Some(query.to_string())),
                    None => (url, None),
                };
                let authorization = request
                    .headers()
                    .iter()
                    .find(|header| header.field.equiv("Authorization"))
                    .map(|header| header.value.as_str().to_string());

                let mut body = String::new();
                if request.as_reader().read_to_string(&mut body).is_err() {
                    let _ = request.respond(
                        tiny_http::Response::from_string("invalid request body")
                            .with_status_code(400),
                    );
                    continue;
                }

                journal.lock().expect("journal lock").push(Received {
                    method: method.clone(),
                    path: path.clone(),
                    query,
                    authorization,
                    body,
                });

                let Some(route) = routes
                    .iter()
                    .find(|route| route.method == method && route.path == path)
                else {
                    let _ = request.respond(
                        tiny_http::Response::from_string(r#"{"detail": "Not Found"}"#)
                            .with_status_code(404),
                    );
                    continue;
                };

                let mut response = tiny_http::Response::from_string(route.body.clone())
                    .with_status_code(route.status);
                let header =
                    tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                        .expect("build header");
                response = response.with_header(header);
                let _ = request.respond(response);
            }
        });

        Self {
            base_url,
            received,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn received(&self) -> Vec<Received> {
        self.received.lock().expect("journal lock").clone()
    }
}

impl Drop for MealieStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn method_name(method: &tiny_http::Method) -> &'static str {
    match method {
        tiny_http::Method::Get => "GET",
        tiny_http::Method::Post => "POST",
        tiny_http::Method::Put => "PUT",
        tiny_http::Method::Delete => "DELETE",
        _ => "OTHER",
    }
}
