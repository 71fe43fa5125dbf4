use crate::engine::RenderEngine;
use crate::error::GenerationError;
use crate::generator::{AUDIO_FILE_NAME, DEFAULT_LENGTH, DEFAULT_SCALE, Generator};
use crate::provider::ChatProvider;
use anyhow::anyhow;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::thread::JoinHandle;
use tiny_http::{Header, Method, Request, Response, Server};

pub const DEFAULT_BIND: &str = "127.0.0.1:5000";
pub const DEFAULT_WORKERS: usize = 4;

const MAX_BODY_BYTES: u64 = 64 * 1024;

#[derive(Deserialize, Debug)]
pub struct GenerateRequest {
    #[serde(default = "default_scale")]
    pub scale: String,
    #[serde(default = "default_length")]
    pub length: i64,
}

fn default_scale() -> String {
    DEFAULT_SCALE.to_owned()
}

fn default_length() -> i64 {
    DEFAULT_LENGTH as i64
}

#[derive(Deserialize, Debug)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ChatReply {
    pub reply: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorBody {
    pub error: String,
}

/// A fully formed HTTP answer, independent of the socket it goes out on.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub attachment: Option<&'static str>,
    pub body: Vec<u8>,
}

impl Reply {
    fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self {
                status,
                content_type: "application/json",
                attachment: None,
                body,
            },
            Err(why) => {
                error!("Failed to serialize response: {}", why);
                Self::empty(500)
            }
        }
    }

    fn error(status: u16, message: impl Into<String>) -> Self {
        Self::json(
            status,
            &ErrorBody {
                error: message.into(),
            },
        )
    }

    fn empty(status: u16) -> Self {
        Self {
            status,
            content_type: "text/plain",
            attachment: None,
            body: Vec::new(),
        }
    }

    fn wav(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            content_type: "audio/wav",
            attachment: Some(AUDIO_FILE_NAME),
            body,
        }
    }
}

impl From<GenerationError> for Reply {
    fn from(err: GenerationError) -> Self {
        Reply::error(err.status_code(), err.to_string())
    }
}

/// Route one request. `body` is the raw request body.
pub fn handle<P, E>(generator: &Generator<P, E>, method: &Method, url: &str, body: &[u8]) -> Reply
where
    P: ChatProvider,
    E: RenderEngine,
{
    let path = url.split('?').next().unwrap_or(url);

    match (method, path) {
        (Method::Options, _) => Reply::empty(204),
        (Method::Post, "/generate-music") => generate_music(generator, body),
        (Method::Post, "/chat") => chat(generator, body),
        (_, "/generate-music" | "/chat") => Reply::error(405, "Method not allowed"),
        _ => Reply::error(404, format!("No route for {path}")),
    }
}

fn generate_music<P: ChatProvider, E: RenderEngine>(generator: &Generator<P, E>, body: &[u8]) -> Reply {
    let request: GenerateRequest = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(why) => return Reply::error(400, format!("Invalid JSON body: {why}")),
    };

    // negative lengths fall through to the generator's range check
    let length = usize::try_from(request.length).unwrap_or(0);

    let result = generator
        .generate(&request.scale, length)
        .and_then(|audio| Ok(audio.read_audio()?));

    match result {
        Ok(bytes) => Reply::wav(bytes),
        Err(why) => why.into(),
    }
}

fn chat<P: ChatProvider, E: RenderEngine>(generator: &Generator<P, E>, body: &[u8]) -> Reply {
    let request: ChatRequest = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(why) => return Reply::error(400, format!("Invalid JSON body: {why}")),
    };

    match generator.chat(request.message.as_deref().unwrap_or_default()) {
        Ok(reply) => Reply::json(200, &ChatReply { reply }),
        Err(why) => why.into(),
    }
}

fn header(name: &str, value: &str) -> Option<Header> {
    let header = Header::from_bytes(name.as_bytes(), value.as_bytes()).ok();
    if header.is_none() {
        warn!("Dropping unrepresentable header {}: {}", name, value);
    }
    header
}

fn respond(request: Request, reply: Reply) {
    let mut response = Response::from_data(reply.body).with_status_code(reply.status);

    let mut headers = vec![
        header("Content-Type", reply.content_type),
        header("Access-Control-Allow-Origin", "*"),
        header("Access-Control-Allow-Methods", "POST, OPTIONS"),
        header("Access-Control-Allow-Headers", "Content-Type"),
    ];
    if let Some(name) = reply.attachment {
        headers.push(header(
            "Content-Disposition",
            &format!("attachment; filename=\"{name}\""),
        ));
    }
    for h in headers.into_iter().flatten() {
        response.add_header(h);
    }

    if let Err(why) = request.respond(response) {
        warn!("Failed to write response: {}", why);
    }
}

fn serve_one<P: ChatProvider, E: RenderEngine>(generator: &Generator<P, E>, mut request: Request) {
    let method = request.method().clone();
    let url = request.url().to_owned();
    debug!("{} {} from {:?}", method, url, request.remote_addr());

    let mut body = Vec::new();
    let reply = match request.as_reader().take(MAX_BODY_BYTES).read_to_end(&mut body) {
        Ok(_) => handle(generator, &method, &url, &body),
        Err(why) => Reply::error(400, format!("Failed to read request body: {why}")),
    };

    if reply.status >= 500 {
        error!("{} {} -> {}", method, url, reply.status);
    } else {
        info!("{} {} -> {}", method, url, reply.status);
    }

    respond(request, reply);
}

/// Serve requests until the server is unblocked. Returns `false` when the listener failed
/// without a stop being requested.
fn worker_loop<P: ChatProvider, E: RenderEngine>(
    n: usize,
    server: &Server,
    generator: &Generator<P, E>,
    stopping: &AtomicBool,
) -> bool {
    let clean = loop {
        match server.recv() {
            Ok(request) => serve_one(generator, request),
            Err(_) if stopping.load(Ordering::SeqCst) => break true,
            Err(why) => {
                error!("Worker {} lost the listener: {}..!", n, why);
                break false;
            }
        }
    };
    debug!("Worker {} exiting..!", n);
    clean
}

/// A running server and its worker threads.
pub struct ServerHandle {
    server: Arc<Server>,
    stopping: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
    addr: SocketAddr,
}

impl ServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Wake every worker, let in-flight requests finish and join them.
    pub fn stop(self) {
        self.stopping.store(true, Ordering::SeqCst);
        for _ in 0..self.workers.len() {
            self.server.unblock();
        }
        for worker in self.workers {
            let _ = worker.join();
        }
        info!("Stopped server on {}..!", self.addr);
    }
}

/// Bind `bind` and serve requests on `workers` threads until [`ServerHandle::stop`].
pub fn start_server<P, E>(
    generator: Arc<Generator<P, E>>,
    bind: &str,
    workers: usize,
) -> anyhow::Result<ServerHandle>
where
    P: ChatProvider + 'static,
    E: RenderEngine + 'static,
{
    let server = Server::http(bind).map_err(|e| anyhow!("Failed to bind {}: {}", bind, e))?;
    let addr = server
        .server_addr()
        .to_ip()
        .ok_or_else(|| anyhow!("Server on {} is not bound to an IP address..!", bind))?;
    let server = Arc::new(server);
    let stopping = Arc::new(AtomicBool::new(false));

    let workers = (0..workers.max(1))
        .map(|n| {
            let server = Arc::clone(&server);
            let generator = Arc::clone(&generator);
            let stopping = Arc::clone(&stopping);
            thread::Builder::new()
                .name(format!("http-worker-{n}"))
                .spawn(move || {
                    worker_loop(n, &server, &*generator, &stopping);
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    info!("Listening on http://{} with {} workers..!", addr, workers.len());

    Ok(ServerHandle {
        server,
        stopping,
        workers,
        addr,
    })
}
