//! Blocking HTTP server exposing the recognizer.
//!
//! Routes:
//!
//! - `POST /recognize` with a `multipart/form-data` body holding the image in the field `image`.
//!   Answers `{"gesture": "<label>"}`.
//!
//! Every connection carries exactly one request. A fixed number of worker threads accept
//! connections from the shared listener, each with its own [`Recognizer`].

pub mod http;
pub mod multipart;

use std::{
    io::{self, BufReader},
    net::{SocketAddr, TcpListener, TcpStream},
    sync::{
        mpsc::{self, Sender},
        Arc,
    },
    thread,
    time::Duration,
};

use anyhow::{bail, Context};
use serde::Serialize;

use crate::{config::ServerConfig, recognizer::Recognizer, service::Service, timer::RateCounter};

use self::{
    http::{HttpError, Request, Response, Status},
    multipart::MultipartError,
};

/// Name of the form field carrying the image.
pub const IMAGE_FIELD: &str = "image";

const STATS_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize)]
struct GestureResponse {
    gesture: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
}

impl Server {
    /// Binds the listening socket.
    pub fn bind(config: ServerConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(&config.listen)
            .with_context(|| format!("failed to listen on {}", config.listen))?;
        Ok(Self { listener, config })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves requests until one of the worker threads exits.
    ///
    /// Workers never stop on their own, so this only returns when one of them panicked.
    pub fn run(self, service: Arc<Service>) -> anyhow::Result<()> {
        log::info!(
            "serving {:?} gestures on {} with {} worker(s)",
            service.variant(),
            self.local_addr()?,
            self.config.workers
        );

        let (exit_tx, exit_rx) = mpsc::channel();
        let mut handles = Vec::with_capacity(self.config.workers);
        for id in 0..self.config.workers {
            let listener = self.listener.try_clone()?;
            let service = service.clone();
            let config = self.config.clone();
            let exit_tx = exit_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("worker-{id}"))
                .spawn(move || {
                    let _notice = ExitNotice { id, tx: exit_tx };
                    let mut worker = Worker {
                        recognizer: service.recognizer(),
                        requests: RateCounter::new(format!("worker-{id} requests"), STATS_INTERVAL),
                        config,
                    };
                    worker.run(&listener);
                })?;
            handles.push(handle);
        }
        drop(exit_tx);

        let id = exit_rx.recv().context("all worker threads vanished")?;
        let handle = handles
            .into_iter()
            .nth(id)
            .with_context(|| format!("unknown worker {id}"))?;
        match handle.join() {
            Ok(()) => bail!("worker-{id} stopped"),
            Err(_) => bail!("worker-{id} panicked"),
        }
    }
}

/// Reports the worker's id to the server when the worker thread exits, even by panicking.
struct ExitNotice {
    id: usize,
    tx: Sender<usize>,
}

impl Drop for ExitNotice {
    fn drop(&mut self) {
        self.tx.send(self.id).ok();
    }
}

struct Worker {
    recognizer: Recognizer,
    requests: RateCounter,
    config: ServerConfig,
}

impl Worker {
    fn run(&mut self, listener: &TcpListener) {
        for stream in listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    log::warn!("failed to accept connection: {e}");
                    continue;
                }
            };
            let peer = stream.peer_addr().ok();
            if let Err(e) = self.handle_connection(stream) {
                log::debug!("connection from {peer:?} failed: {e}");
            }
        }
    }

    fn handle_connection(&mut self, stream: TcpStream) -> io::Result<()> {
        let timeout = Some(Duration::from_secs(self.config.timeout_secs));
        stream.set_read_timeout(timeout)?;
        stream.set_write_timeout(timeout)?;

        let mut reader = BufReader::new(&stream);
        let response = match Request::read(&mut reader, self.config.max_body_bytes) {
            Ok(request) => {
                let response = self.respond(&request);
                log::debug!(
                    "{} {} -> {}",
                    request.method(),
                    request.path(),
                    response.status()
                );
                response
            }
            Err(HttpError::Io(e)) => return Err(e),
            Err(e) => {
                log::debug!("rejecting request: {e}");
                let status = e.status().unwrap_or(Status::BAD_REQUEST);
                Response::error(status, &e)
            }
        };

        response.write_to(&mut &stream)?;
        self.requests.tick_with(self.recognizer.timers());
        Ok(())
    }

    fn respond(&mut self, request: &Request) -> Response {
        match (request.method(), request.path()) {
            ("POST", "/recognize") => self.recognize(request),
            (_, "/recognize") => Response::error(Status::METHOD_NOT_ALLOWED, "method not allowed")
                .with_header("Allow", "POST"),
            _ => Response::error(Status::NOT_FOUND, "not found"),
        }
    }

    fn recognize(&mut self, request: &Request) -> Response {
        let image = match image_field(request) {
            Ok(image) => image,
            Err(e) => return Response::error(Status::BAD_REQUEST, e),
        };

        let recognition = self.recognizer.recognize(image);
        let error = match recognition.error {
            Some(e) if self.config.expose_errors => Some(e.to_string()),
            _ => None,
        };
        Response::json(
            Status::OK,
            &GestureResponse {
                gesture: recognition.label,
                error,
            },
        )
    }
}

fn image_field(request: &Request) -> Result<&[u8], MultipartError> {
    let content_type = request
        .header("Content-Type")
        .ok_or(MultipartError::NotMultipart)?;
    let boundary = multipart::boundary(content_type)?;
    let parts = multipart::parse(request.body(), boundary)?;
    multipart::field(&parts, IMAGE_FIELD)
}
