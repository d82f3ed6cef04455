use http_body_util::Full;
use hyper::body::Bytes;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use owo_colors::OwoColorize;
use prometheus::{
    Encoder, HistogramVec, IntCounterVec, TextEncoder, histogram_opts, opts,
    register_histogram_vec, register_int_counter_vec,
};
use tokio::net::TcpListener;

/// Per-controller prometheus instruments, registered with the default
/// registry and served by [`run_metrics_server`].
pub struct ControllerMetrics {
    pub reconcile_counter: IntCounterVec,
    pub read_histogram: HistogramVec,
    pub write_histogram: HistogramVec,
    pub outcome_counter: IntCounterVec,
}

impl ControllerMetrics {
    pub fn new(controller: &str) -> Self {
        ControllerMetrics {
            reconcile_counter: register_int_counter_vec!(
                opts!(
                    format!("octopus_{}_reconciles_total", controller),
                    "Total number of reconciliations."
                ),
                &["suite"]
            )
            .expect("register reconcile counter"),
            read_histogram: register_histogram_vec!(
                histogram_opts!(
                    format!("octopus_{}_read_phase_seconds", controller),
                    "Duration of the read phase (listing pods, aggregating status)."
                ),
                &["suite"]
            )
            .expect("register read histogram"),
            write_histogram: register_histogram_vec!(
                histogram_opts!(
                    format!("octopus_{}_write_phase_seconds", controller),
                    "Duration of the write phase (pod creation, status persistence)."
                ),
                &["suite"]
            )
            .expect("register write histogram"),
            outcome_counter: register_int_counter_vec!(
                opts!(
                    format!("octopus_{}_outcomes_total", controller),
                    "Reconciliation outcomes by kind."
                ),
                &["suite", "outcome"]
            )
            .expect("register outcome counter"),
        }
    }
}

/// Serves /metrics, /healthz and /readyz on the given port until the process
/// exits. Spawned once by the controller entrypoint.
pub async fn run_metrics_server(port: u16) {
    let addr = format!("0.0.0.0:{}", port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("🛑 Failed to bind metrics server to {}: {}", addr, e);
            return;
        }
    };
    println!(
        "{}{}",
        "📈 Starting metrics server • port=".green(),
        format!("{}", port).green().dimmed(),
    );
    loop {
        let (stream, _) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                eprintln!("metrics server accept failed: {}", e);
                continue;
            }
        };
        let io = TokioIo::new(stream);
        tokio::spawn(async move {
            if let Err(e) = hyper::server::conn::http1::Builder::new()
                .serve_connection(io, service_fn(handle))
                .await
            {
                eprintln!("metrics connection error: {}", e);
            }
        });
    }
}

async fn handle(
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, std::convert::Infallible> {
    let response = match req.uri().path() {
        "/metrics" => {
            let mut buffer = Vec::new();
            match TextEncoder::new().encode(&prometheus::gather(), &mut buffer) {
                Ok(()) => Response::new(Full::new(Bytes::from(buffer))),
                Err(e) => Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .body(Full::new(Bytes::from(format!("encode metrics: {}", e))))
                    .unwrap(),
            }
        }
        "/healthz" | "/readyz" => Response::new(Full::new(Bytes::from("ok"))),
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("not found")))
            .unwrap(),
    };
    Ok(response)
}
