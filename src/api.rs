use std::convert::Infallible;
use std::sync::Arc;

use log::{debug, error, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::engine::predictor::FeedbackPredictor;
use crate::error::PredictorError;

/// Body of a successful `POST /data`.
pub const DATA_ACK: &str = "Data received and model updated";

const MAX_BODY_BYTES: u64 = 16 * 1024;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataRequest {
    pub input_values: Vec<f64>,
    pub is_correct: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictRequest {
    pub input_values: Vec<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PredictResponse {
    pub prediction: f64,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// `POST /data`, `POST /predict` and `GET /status`, with every rejection turned into a JSON
/// error body.
pub fn routes(
    predictor: Arc<FeedbackPredictor>,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let state_filter = warp::any().map(move || predictor.clone());

    let data = warp::path("data")
        .and(warp::path::end())
        .and(warp::post())
        .and(json_body::<DataRequest>())
        .and(state_filter.clone())
        .and_then(handle_data);
    let predict = warp::path("predict")
        .and(warp::path::end())
        .and(warp::post())
        .and(json_body::<PredictRequest>())
        .and(state_filter.clone())
        .and_then(handle_predict);
    let status = warp::path("status")
        .and(warp::path::end())
        .and(warp::get())
        .and(state_filter)
        .and_then(handle_status);

    data.or(predict)
        .or(status)
        .with(warp::log("feedback_predictor::http"))
        .recover(handle_rejection)
}

fn json_body<T: DeserializeOwned + Send>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone {
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

/// Runs `f` on the blocking pool; ingests may sit through a whole retrain.
async fn blocking<T, F>(f: F) -> Result<T, Rejection>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, PredictorError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(PredictorError::from)
        .and_then(|result| result)
        .map_err(warp::reject::custom)
}

async fn handle_data(
    body: DataRequest,
    predictor: Arc<FeedbackPredictor>,
) -> Result<impl Reply, Rejection> {
    debug!("Received sample: {:?}", body);
    let outcome = blocking(move || predictor.ingest(&body.input_values, body.is_correct)).await?;

    if let Some(report) = &outcome.retrained {
        let last = report.history.last();
        info!(
            "Sample {} stored, retrained over {} samples (final loss {:?})",
            outcome.samples,
            report.samples,
            last.map(|logs| logs.loss)
        );
    }

    Ok(warp::reply::with_status(DATA_ACK, StatusCode::OK))
}

async fn handle_predict(
    body: PredictRequest,
    predictor: Arc<FeedbackPredictor>,
) -> Result<impl Reply, Rejection> {
    debug!("Received prediction request: {:?}", body.input_values);
    let prediction = blocking(move || predictor.predict(&body.input_values)).await?;
    debug!("Returning prediction: {prediction}");
    Ok(warp::reply::json(&PredictResponse { prediction }))
}

async fn handle_status(predictor: Arc<FeedbackPredictor>) -> Result<impl Reply, Rejection> {
    let status = blocking(move || Ok(predictor.status())).await?;
    Ok(warp::reply::json(&status))
}

async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (code, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "not found".to_string())
    } else if let Some(e) = err.find::<PredictorError>() {
        if e.is_client_error() {
            warn!("Rejected request: {e}");
            (StatusCode::BAD_REQUEST, e.to_string())
        } else {
            error!("Request failed: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "payload too large".to_string())
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        (StatusCode::LENGTH_REQUIRED, "content-length required".to_string())
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        (StatusCode::UNSUPPORTED_MEDIA_TYPE, "expected application/json".to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method not allowed".to_string())
    } else {
        error!("Unhandled rejection: {:?}", err);
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&ErrorBody { error: message }),
        code,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use serde_json::json;
    use tempfile::TempDir;

    fn predictor(dir: &TempDir, epochs: usize) -> Arc<FeedbackPredictor> {
        let mut settings = Settings::default();
        settings.storage.data_file = dir.path().join("data.json");
        settings.storage.model_file = dir.path().join("model.json");
        settings.training.epochs = epochs;
        settings.training.seed = Some(2024);
        Arc::new(FeedbackPredictor::open(&settings).unwrap())
    }

    fn error_of(body: &[u8]) -> String {
        let value: serde_json::Value = serde_json::from_slice(body).unwrap();
        value["error"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn eleventh_sample_answers_after_training_then_predict_works() {
        let dir = TempDir::new().unwrap();
        let predictor = predictor(&dir, 50);
        let api = routes(predictor.clone());

        for n in 1..=11 {
            let resp = warp::test::request()
                .method("POST")
                .path("/data")
                .json(&json!({ "inputValues": [1, 2, 3, 4, 5, 6], "isCorrect": true }))
                .reply(&api)
                .await;
            assert_eq!(resp.status(), StatusCode::OK);
            assert_eq!(resp.body(), DATA_ACK);

            let expected_version = if n <= 10 { 0 } else { 1 };
            assert_eq!(predictor.model().version(), expected_version);
        }

        let resp = warp::test::request()
            .method("POST")
            .path("/predict")
            .json(&json!({ "inputValues": [1, 2, 3, 4, 5, 6] }))
            .reply(&api)
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: PredictResponse = serde_json::from_slice(resp.body()).unwrap();
        assert!(body.prediction.is_finite());
    }

    #[tokio::test]
    async fn status_reports_samples_and_version() {
        let dir = TempDir::new().unwrap();
        let api = routes(predictor(&dir, 1));

        warp::test::request()
            .method("POST")
            .path("/data")
            .json(&json!({ "inputValues": [6, 5, 4, 3, 2, 1], "isCorrect": false }))
            .reply(&api)
            .await;

        let resp = warp::test::request().path("/status").reply(&api).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let status: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(
            status,
            json!({
                "ready": true,
                "samples": 1,
                "retrain_threshold": 10,
                "model_version": 0,
                "artifact_present": false,
            })
        );
    }

    #[tokio::test]
    async fn short_vector_is_a_client_error() {
        let dir = TempDir::new().unwrap();
        let predictor = predictor(&dir, 1);
        let api = routes(predictor.clone());

        let resp = warp::test::request()
            .method("POST")
            .path("/data")
            .json(&json!({ "inputValues": [1, 2, 3], "isCorrect": true }))
            .reply(&api)
            .await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(error_of(resp.body()).contains("6 numbers"));
        assert_eq!(predictor.status().samples, 0);
    }

    #[tokio::test]
    async fn malformed_json_is_a_client_error() {
        let dir = TempDir::new().unwrap();
        let api = routes(predictor(&dir, 1));

        let missing_field = warp::test::request()
            .method("POST")
            .path("/data")
            .json(&json!({ "inputValues": [1, 2, 3, 4, 5, 6] }))
            .reply(&api)
            .await;
        assert_eq!(missing_field.status(), StatusCode::BAD_REQUEST);

        let not_json = warp::test::request()
            .method("POST")
            .path("/predict")
            .header("content-type", "application/json")
            .body("{ inputValues: ")
            .reply(&api)
            .await;
        assert_eq!(not_json.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn oversized_body_is_refused() {
        let dir = TempDir::new().unwrap();
        let api = routes(predictor(&dir, 1));

        let resp = warp::test::request()
            .method("POST")
            .path("/predict")
            .header("content-type", "application/json")
            .body(vec![b' '; (MAX_BODY_BYTES + 1) as usize])
            .reply(&api)
            .await;
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn unknown_routes_and_methods() {
        let dir = TempDir::new().unwrap();
        let api = routes(predictor(&dir, 1));

        let missing = warp::test::request().path("/nope").reply(&api).await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let wrong_method = warp::test::request().method("GET").path("/data").reply(&api).await;
        assert_eq!(wrong_method.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn failed_retrain_is_a_server_error_but_keeps_the_sample() {
        let dir = TempDir::new().unwrap();
        let ragged = json!([
            { "inputValues": [0.0, 1.0], "label": 1 },
            { "inputValues": [0.0, 0.2, 0.4, 0.6, 0.8, 1.0], "label": 0 },
        ]);
        std::fs::write(dir.path().join("data.json"), ragged.to_string()).unwrap();

        let mut settings = Settings::default();
        settings.storage.data_file = dir.path().join("data.json");
        settings.storage.model_file = dir.path().join("model.json");
        settings.training.retrain_threshold = 2;
        settings.training.seed = Some(1);
        let predictor = Arc::new(FeedbackPredictor::open(&settings).unwrap());
        let api = routes(predictor.clone());

        let resp = warp::test::request()
            .method("POST")
            .path("/data")
            .json(&json!({ "inputValues": [1, 2, 3, 4, 5, 6], "isCorrect": true }))
            .reply(&api)
            .await;

        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(error_of(resp.body()).contains("sample 0"));
        assert_eq!(predictor.status().samples, 3);
    }
}
