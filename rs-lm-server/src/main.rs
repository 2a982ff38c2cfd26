use std::sync::{Arc, Mutex};

use actix_cors::Cors;
use actix_web::{get, put, web, App, HttpResponse, HttpServer, Responder};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use rs_lm_core::io::{build_output_path, get_filename, list_files};
use rs_lm_core::{Config, LanguageModel, Model, ModelType, WordScore};

const DATA_DIR: &str = "./data";

/// Struct representing query parameters for the `/v1/score` endpoint
#[derive(Deserialize)]
struct ScoreParams {
	sentence: String,
	bos: Option<bool>,
	eos: Option<bool>,
}

#[derive(Deserialize)]
struct ModelQuery {
	name: Option<String>,
	model_type: Option<String>,
}

#[derive(Serialize)]
struct ScoreResponse {
	total: f32,
	perplexity: f64,
	words: Vec<WordScore>,
}

#[derive(Serialize)]
struct ModelInfo {
	name: String,
	model_type: ModelType,
	order: usize,
	counts: Vec<u64>,
	mapped: bool,
}

/// The loaded model, replaced as a whole by `/v1/load_model`.
///
/// Requests clone the `Arc` and score without holding the lock.
struct SharedData {
	name: String,
	model: Option<Arc<Model>>,
}

/// Whether `name` names a file directly inside `./data`.
fn is_model_name(name: &str) -> bool {
	!name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\', std::path::MAIN_SEPARATOR, '\0'])
}

/// Opens `./data/{name}.bin` when present, otherwise builds it from
/// `./data/{name}.arpa` and writes the binary for next time.
fn open_model(name: &str, model_type: ModelType) -> Result<Model, Box<dyn std::error::Error>> {
	if !is_model_name(name) {
		return Err(format!("invalid model name '{name}'").into());
	}
	let config = Config::default();
	let arpa_path = format!("{DATA_DIR}/{name}.arpa");
	let binary_path = build_output_path(&arpa_path, "bin")?;
	if binary_path.exists() {
		return Ok(Model::from_binary(binary_path, &config)?);
	}
	let model = Model::from_arpa(&arpa_path, model_type, &config)?;
	if let Err(e) = model.write_binary(&binary_path) {
		warn!("Could not cache {}: {e}", binary_path.display());
	}
	Ok(model)
}

fn current(data: &web::Data<Mutex<SharedData>>) -> Result<(String, Arc<Model>), HttpResponse> {
	let shared_data = data.lock().map_err(|_| HttpResponse::InternalServerError().body("Model lock failed"))?;
	match &shared_data.model {
		Some(model) => Ok((shared_data.name.clone(), Arc::clone(model))),
		None => Err(HttpResponse::Conflict().body("No model loaded")),
	}
}

/// HTTP GET endpoint `/v1/score`
///
/// Scores a whitespace-separated sentence with the loaded model.
/// `bos` and `eos` default to true.
#[get("/v1/score")]
async fn get_score(data: web::Data<Mutex<SharedData>>, query: web::Query<ScoreParams>) -> impl Responder {
	let (_, model) = match current(&data) {
		Ok(loaded) => loaded,
		Err(response) => return response,
	};
	let words = model.full_scores(&query.sentence, query.bos.unwrap_or(true), query.eos.unwrap_or(true));
	let total: f32 = words.iter().map(|w| w.prob).sum();
	let perplexity = if words.is_empty() { 1.0 } else { 10f64.powf(-f64::from(total) / words.len() as f64) };
	HttpResponse::Ok().json(ScoreResponse { total, perplexity, words })
}

#[get("/v1/models")]
async fn get_models() -> impl Responder {
	match list_files(DATA_DIR, &["arpa", "bin"]) {
		Ok(files) => {
			let mut names: Vec<String> = files.iter().filter_map(|f| get_filename(f).ok()).collect();
			names.dedup();
			HttpResponse::Ok().body(names.join("\n"))
		}
		Err(_) => HttpResponse::InternalServerError().body("Failed to list models"),
	}
}

#[get("/v1/loaded_model")]
async fn get_loaded_model(data: web::Data<Mutex<SharedData>>) -> impl Responder {
	match current(&data) {
		Ok((name, model)) => HttpResponse::Ok().json(ModelInfo {
			name,
			model_type: model.model_type(),
			order: model.order(),
			counts: model.parameters().counts.clone(),
			mapped: model.is_mapped(),
		}),
		Err(response) => response,
	}
}

#[put("/v1/load_model")]
async fn put_model(data: web::Data<Mutex<SharedData>>, query: web::Query<ModelQuery>) -> impl Responder {
	let name = match &query.name {
		Some(s) if !s.trim().is_empty() => s.trim().to_owned(),
		_ => return HttpResponse::BadRequest().body("Missing or empty model name"),
	};
	if !is_model_name(&name) {
		return HttpResponse::BadRequest().body("Model names cannot contain path separators");
	}
	let model_type = match query.model_type.as_deref().map(str::parse::<ModelType>) {
		None => ModelType::Probing,
		Some(Ok(model_type)) => model_type,
		Some(Err(e)) => return HttpResponse::BadRequest().body(e),
	};

	let model = match web::block(move || open_model(&name, model_type).map(|m| (name, m)).map_err(|e| e.to_string())).await {
		Ok(Ok(loaded)) => loaded,
		Ok(Err(e)) => return HttpResponse::InternalServerError().body(format!("Failed to load model: {e}")),
		Err(_) => return HttpResponse::InternalServerError().body("Model loading was interrupted"),
	};

	let mut shared_data = match data.lock() {
		Ok(m) => m,
		Err(_) => return HttpResponse::InternalServerError().body("Model lock failed"),
	};
	info!("Serving model '{}'", model.0);
	shared_data.name = model.0;
	shared_data.model = Some(Arc::new(model.1));
	HttpResponse::Ok().body("Model loaded successfully")
}

/// Main entry point for the server.
///
/// Optionally loads the model named by the first argument from `./data`,
/// then starts an Actix-web HTTP server on 127.0.0.1:5000.
#[actix_web::main]
async fn main() -> std::io::Result<()> {
	env_logger::init();

	let mut shared_data = SharedData { name: String::new(), model: None };
	if let Some(name) = std::env::args().nth(1) {
		let model_type = std::env::args().nth(2).and_then(|t| t.parse().ok()).unwrap_or(ModelType::Probing);
		match open_model(&name, model_type) {
			Ok(model) => {
				info!("Serving model '{name}'");
				shared_data = SharedData { name, model: Some(Arc::new(model)) };
			}
			Err(e) => warn!("Could not load model '{name}': {e}"),
		}
	}
	let shared_model = web::Data::new(Mutex::new(shared_data));

	HttpServer::new(move || {
		App::new()
			.wrap(Cors::permissive())
			.app_data(shared_model.clone())
			.service(get_score)
			.service(get_models)
			.service(get_loaded_model)
			.service(put_model)
	})
	.bind(("127.0.0.1", 5000))?
	.run()
	.await
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn model_names_stay_inside_the_data_folder() {
		assert!(is_model_name("sample"));
		assert!(is_model_name("news.en-3"));
		assert!(!is_model_name(""));
		assert!(!is_model_name(".."));
		assert!(!is_model_name("../secret"));
		assert!(!is_model_name("nested/sample"));
		assert!(!is_model_name("..\\sample"));
	}

	#[test]
	fn open_model_rejects_paths() {
		assert!(open_model("../Cargo", ModelType::Probing).is_err());
	}
}
