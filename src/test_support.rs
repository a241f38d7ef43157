//! Shared fixtures for unit tests: a scripted gateway and a loopback HTTP server.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    io::{Read, Write},
    net::{TcpListener, TcpStream},
    sync::{
        Mutex,
        mpsc::{self, Receiver, Sender},
    },
    thread,
};

use crate::api::{
    ApiError, ApiGateway, ModelId, PredictionHistoryPage, PredictionResult, TrainedModel,
};
use crate::pipeline::{
    Column, Dtype, FeatureSchema, NumericKind, PredictionRequest, TrainingRequest,
};

type Gate<T> = Receiver<Result<T, ApiError>>;

/// Gateway whose responses are scripted per test.
///
/// Calls without a script answer immediately with a fixed success value.
/// A held call blocks its worker until the test sends on the returned sender;
/// dropping the sender releases it with a transport error.
#[derive(Default)]
pub(crate) struct FakeGateway {
    state: Mutex<FakeState>,
}

#[derive(Default)]
struct FakeState {
    held_schemas: HashMap<ModelId, Gate<FeatureSchema>>,
    failing_schemas: HashMap<ModelId, ApiError>,
    schema_calls: Vec<ModelId>,
    held_predictions: VecDeque<Gate<PredictionResult>>,
    failing_predictions: VecDeque<ApiError>,
    predictions: Vec<PredictionRequest>,
    held_trainings: VecDeque<Gate<TrainedModel>>,
    trainings: Vec<TrainingRequest>,
}

impl FakeGateway {
    pub(crate) fn hold_schema(&self, model_id: ModelId) -> Sender<Result<FeatureSchema, ApiError>> {
        let (tx, rx) = mpsc::channel();
        self.lock().held_schemas.insert(model_id, rx);
        tx
    }

    pub(crate) fn fail_schema(&self, model_id: ModelId, error: ApiError) {
        self.lock().failing_schemas.insert(model_id, error);
    }

    pub(crate) fn schema_calls(&self) -> Vec<ModelId> {
        self.lock().schema_calls.clone()
    }

    pub(crate) fn hold_prediction(&self) -> Sender<Result<PredictionResult, ApiError>> {
        let (tx, rx) = mpsc::channel();
        self.lock().held_predictions.push_back(rx);
        tx
    }

    pub(crate) fn fail_next_prediction(&self, error: ApiError) {
        self.lock().failing_predictions.push_back(error);
    }

    pub(crate) fn predictions(&self) -> Vec<PredictionRequest> {
        self.lock().predictions.clone()
    }

    pub(crate) fn hold_training(&self) -> Sender<Result<TrainedModel, ApiError>> {
        let (tx, rx) = mpsc::channel();
        self.lock().held_trainings.push_back(rx);
        tx
    }

    pub(crate) fn trainings(&self) -> Vec<TrainingRequest> {
        self.lock().trainings.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }
}

fn wait_gate<T>(gate: Gate<T>) -> Result<T, ApiError> {
    gate.recv()
        .unwrap_or_else(|_| Err(ApiError::Transport("released without a response".to_string())))
}

impl ApiGateway for FakeGateway {
    fn fetch_schema(&self, model_id: ModelId) -> Result<FeatureSchema, ApiError> {
        let (gate, failure) = {
            let mut state = self.lock();
            state.schema_calls.push(model_id);
            (
                state.held_schemas.remove(&model_id),
                state.failing_schemas.get(&model_id).cloned(),
            )
        };
        if let Some(gate) = gate {
            return wait_gate(gate);
        }
        match failure {
            Some(error) => Err(error),
            None => Ok(schema_for(model_id)),
        }
    }

    fn predict(&self, request: &PredictionRequest) -> Result<PredictionResult, ApiError> {
        let (gate, failure) = {
            let mut state = self.lock();
            state.predictions.push(request.clone());
            (
                state.held_predictions.pop_front(),
                state.failing_predictions.pop_front(),
            )
        };
        if let Some(gate) = gate {
            return wait_gate(gate);
        }
        match failure {
            Some(error) => Err(error),
            None => Ok(PredictionResult {
                predictions: vec![serde_json::json!(1)],
                confidence_score: Some(0.9),
            }),
        }
    }

    fn train(&self, request: &TrainingRequest) -> Result<TrainedModel, ApiError> {
        let gate = {
            let mut state = self.lock();
            state.trainings.push(request.clone());
            state.held_trainings.pop_front()
        };
        match gate {
            Some(gate) => wait_gate(gate),
            None => Ok(TrainedModel {
                model_id: ModelId(42),
                message: Some("Model trained successfully".to_string()),
            }),
        }
    }

    fn prediction_history(
        &self,
        _model_id: ModelId,
        page: u32,
        _per_page: u32,
    ) -> Result<PredictionHistoryPage, ApiError> {
        Ok(PredictionHistoryPage {
            records: Vec::new(),
            page,
            pages: Some(0),
            total: Some(0),
        })
    }
}

/// `age` (int64) followed by `city` (object) with `NYC -> 0`, `LA -> 1`.
pub(crate) fn schema_for(model_id: ModelId) -> FeatureSchema {
    let mut encoders = BTreeMap::new();
    encoders.insert(
        "city".to_string(),
        BTreeMap::from([("NYC".to_string(), 0), ("LA".to_string(), 1)]),
    );
    FeatureSchema::new(
        model_id,
        vec![
            Column {
                name: "age".to_string(),
                dtype: Dtype::Numeric(NumericKind::Integer),
                raw_dtype: "int64".to_string(),
            },
            Column {
                name: "city".to_string(),
                dtype: Dtype::Categorical,
                raw_dtype: "object".to_string(),
            },
        ],
        encoders,
    )
    .unwrap()
}

/// Raw HTTP/1.1 response with a JSON content type.
pub(crate) fn json_response(status: u16, body: &str) -> String {
    let reason = match status {
        200 => "OK",
        201 => "Created",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Status",
    };
    format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

/// Serve one response and hand the raw request text back to the test.
pub(crate) fn serve_capture(response: String) -> (String, Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            let request = read_request(&mut stream);
            let _ = tx.send(request);
            let _ = stream.write_all(response.as_bytes());
        }
    });
    (format!("http://{addr}"), rx)
}

/// Serve the given responses to consecutive connections.
pub(crate) fn serve_sequence(responses: Vec<String>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        for response in responses {
            let Ok((mut stream, _)) = listener.accept() else {
                return;
            };
            read_request(&mut stream);
            let _ = stream.write_all(response.as_bytes());
        }
    });
    format!("http://{addr}")
}

fn read_request(stream: &mut TcpStream) -> String {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let read = match stream.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(read) => read,
        };
        data.extend_from_slice(&buf[..read]);
        if let Some(end) = find_header_end(&data) {
            let headers = String::from_utf8_lossy(&data[..end]).to_ascii_lowercase();
            let length = headers
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|value| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if data.len() >= end + 4 + length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&data).into_owned()
}

fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|window| window == b"\r\n\r\n")
}
