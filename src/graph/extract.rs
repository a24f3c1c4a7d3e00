//! Job metadata extraction: flatten a graph into the record stored in
//! jobs.json.
//!
//! The pass runs in four steps:
//! 1) Seed the record with the image file name and resolution.
//! 2) Pull model and sampler parameters by key, wherever they live.
//! 3) Walk nodes by kind and copy per-kind field sets under prefixed names.
//! 4) Resolve prompt text through one hop of link indirection.
//!
//! Missing inputs are never an error; the record just lacks those fields.

use crate::graph::node::{ExecutionGraph, GraphNode, NodeInput, NodeKind};
use crate::keys::{find_parameter_values, strip_known_extension};
use serde_json::{Map, Value};

/// Flat field-name to value mapping for one saved image.
pub type ExtractedRecord = Map<String, Value>;

pub const POSITIVE_PROMPT: &str = "positive_prompt";
pub const NEGATIVE_PROMPT: &str = "negative_prompt";

/// Model parameters: (searched key, record key).
const MODEL_FIELDS: [(&str, &str); 6] = [
    ("ckpt_name", "checkpoint"),
    ("vae_name", "vae"),
    ("model_name", "upscale_model"),
    ("clip_skip", "clip_skip"),
    ("empty_latent_width", "empty_latent_width"),
    ("empty_latent_height", "empty_latent_height"),
];

const SAMPLER_FIELDS: [&str; 5] = ["steps", "cfg", "sampler_name", "scheduler", "denoise"];

/// LatentUpscale inputs: (input, record key).
const LATENT_UPSCALE_FIELDS: [(&str, &str); 4] = [
    ("upscale_method", "upscale_method"),
    ("width", "upscale_width"),
    ("height", "upscale_height"),
    ("crop", "upscale_crop"),
];

/// KSamplerAdvanced inputs, recorded as the upscale pass sampler.
const UPSCALE_SAMPLER_FIELDS: [(&str, &str); 7] = [
    ("steps", "upscale_sampler_steps"),
    ("cfg", "upscale_sampler_cfg"),
    ("sampler_name", "upscale_sampler_name"),
    ("scheduler", "upscale_sampler_scheduler"),
    ("start_at_step", "upscale_sampler_start_at_step"),
    ("end_at_step", "upscale_sampler_end_at_step"),
    ("add_noise", "upscale_sampler_add_noise"),
];

/// Build the job record for one saved image.
///
/// `graph` may be absent when the host ran without a prompt; the record then
/// only carries the file name and resolution.
pub fn extract_record(
    graph: Option<&ExecutionGraph>,
    file_name: &str,
    resolution: &str,
) -> ExtractedRecord {
    let mut record = ExtractedRecord::new();
    record.insert("filename".to_string(), Value::from(file_name));
    record.insert("resolution".to_string(), Value::from(resolution));

    let Some(graph) = graph else {
        return record;
    };

    let search_keys: Vec<&str> = MODEL_FIELDS.iter().map(|(key, _)| *key).collect();
    let models = find_parameter_values(graph.raw(), &search_keys);
    for (key, record_key) in MODEL_FIELDS {
        if let Some(value) = models.get(key).filter(|v| is_truthy(v)) {
            record.insert(record_key.to_string(), value.clone());
        }
    }

    record.extend(find_parameter_values(graph.raw(), &SAMPLER_FIELDS));

    for node in graph.nodes() {
        match &node.kind {
            NodeKind::SeedEverywhere => copy_input(&mut record, node, "seed", "seed"),
            NodeKind::LatentUpscale => copy_fields(&mut record, node, &LATENT_UPSCALE_FIELDS),
            NodeKind::KSamplerAdvanced => {
                record.insert(
                    "upscale_sampler".to_string(),
                    Value::from(node.kind.class_type()),
                );
                copy_fields(&mut record, node, &UPSCALE_SAMPLER_FIELDS);
                copy_linked_prompts(&mut record, graph, node);
            }
            NodeKind::KSampler | NodeKind::UltimateSdUpscale => {
                copy_linked_prompts(&mut record, graph, node)
            }
            NodeKind::LoraStacker => copy_lora_stack(&mut record, node),
            NodeKind::EfficientLoader | NodeKind::EfficientLoaderSdxl => {
                copy_inline_prompts(&mut record, node)
            }
            NodeKind::Other(_) => {}
        }
    }

    record
}

fn copy_input(record: &mut ExtractedRecord, node: &GraphNode, input: &str, key: &str) {
    if let Some(value) = node.input(input) {
        record.insert(key.to_string(), value.clone());
    }
}

fn copy_fields(record: &mut ExtractedRecord, node: &GraphNode, fields: &[(&str, &str)]) {
    for (input, key) in fields {
        copy_input(record, node, input, key);
    }
}

fn copy_lora_stack(record: &mut ExtractedRecord, node: &GraphNode) {
    record.insert(
        "lora_stacker".to_string(),
        Value::from(node.kind.class_type()),
    );
    copy_input(record, node, "input_mode", "lora_stacker_mode");
    copy_input(record, node, "lora_count", "lora_stacker_count");

    // The declared count is trusted; slots past the real inputs come out empty.
    let count = node.input("lora_count").and_then(as_count).unwrap_or(0);
    for i in 1..=count {
        if let Some(name) = node.input(&format!("lora_name_{i}")) {
            record.insert(
                format!("lora_stacker_lora_name_{i}"),
                strip_known_extension(name),
            );
        }
        copy_input(
            record,
            node,
            &format!("lora_wt_{i}"),
            &format!("lora_stacker_lora_wt_{i}"),
        );
        copy_input(
            record,
            node,
            &format!("model_str_{i}"),
            &format!("lora_stacker_lora_model_str_{i}"),
        );
        copy_input(
            record,
            node,
            &format!("clip_str_{i}"),
            &format!("lora_stacker_lora_clip_str_{i}"),
        );
    }
}

/// Efficiency loaders carry prompt text inline.
fn copy_inline_prompts(record: &mut ExtractedRecord, node: &GraphNode) {
    if node.inputs.contains_key("positive") && node.inputs.contains_key("negative") {
        copy_input(record, node, "positive", POSITIVE_PROMPT);
        copy_input(record, node, "negative", NEGATIVE_PROMPT);
    }
}

/// Samplers reference their prompts through links to text-encode nodes.
///
/// If either resolved text is itself a link the node is skipped entirely.
/// Negative text is stored under `positive_prompt`, so the last resolved
/// prompt of a sampler is what the record keeps.
fn copy_linked_prompts(record: &mut ExtractedRecord, graph: &ExecutionGraph, node: &GraphNode) {
    let positive = graph.linked_text(node, "positive");
    let negative = graph.linked_text(node, "negative");

    for text in [positive, negative].into_iter().flatten() {
        if NodeInput::is_reference_artifact(text) {
            tracing::debug!(
                node = %node.id,
                kind = node.kind.class_type(),
                "prompt text is a link, skipping node"
            );
            return;
        }
        record.insert(POSITIVE_PROMPT.to_string(), text.clone());
    }
}

fn as_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn extract(prompt: Value) -> ExtractedRecord {
        let graph = ExecutionGraph::from_prompt(prompt.as_object().unwrap());
        extract_record(Some(&graph), "0001.png", "1024x1024")
    }

    #[test]
    fn seeds_filename_and_resolution_without_graph() {
        let record = extract_record(None, "0007.png", "512x768");
        assert_eq!(
            Value::Object(record),
            json!({"filename": "0007.png", "resolution": "512x768"})
        );
    }

    #[test]
    fn pulls_model_and_sampler_parameters() {
        let record = extract(json!({
            "4": {"class_type": "CheckpointLoaderSimple",
                  "inputs": {"ckpt_name": "sdxl/juggernaut.safetensors"}},
            "5": {"class_type": "EmptyLatentImage",
                  "inputs": {"empty_latent_width": 1024, "empty_latent_height": 0}},
            "3": {"class_type": "KSampler",
                  "inputs": {"steps": 25, "cfg": 6.5, "sampler_name": "dpmpp_2m",
                             "scheduler": "karras", "denoise": 1.0}},
        }));

        assert_eq!(
            Value::Object(record),
            json!({
                "filename": "0001.png",
                "resolution": "1024x1024",
                "checkpoint": "juggernaut",
                "empty_latent_width": 1024,
                "steps": 25,
                "cfg": 6.5,
                "sampler_name": "dpmpp_2m",
                "scheduler": "karras",
                "denoise": 1.0,
            })
        );
    }

    #[test]
    fn copies_per_kind_fields() {
        let record = extract(json!({
            "1": {"class_type": "Seed Everywhere", "inputs": {"seed": 1234}},
            "2": {"class_type": "LatentUpscale",
                  "inputs": {"upscale_method": "nearest-exact", "width": 2048,
                             "height": 2048, "crop": "disabled"}},
        }));

        assert_eq!(record.get("seed"), Some(&json!(1234)));
        assert_eq!(record.get("upscale_method"), Some(&json!("nearest-exact")));
        assert_eq!(record.get("upscale_width"), Some(&json!(2048)));
        assert_eq!(record.get("upscale_height"), Some(&json!(2048)));
        assert_eq!(record.get("upscale_crop"), Some(&json!("disabled")));
    }

    #[test]
    fn advanced_sampler_records_upscale_block() {
        let record = extract(json!({
            "8": {"class_type": "KSamplerAdvanced",
                  "inputs": {"steps": 12, "cfg": 5, "sampler_name": "euler",
                             "scheduler": "normal", "start_at_step": 6,
                             "end_at_step": 10000, "add_noise": "enable"}},
        }));

        assert_eq!(record.get("upscale_sampler"), Some(&json!("KSamplerAdvanced")));
        assert_eq!(record.get("upscale_sampler_steps"), Some(&json!(12)));
        assert_eq!(record.get("upscale_sampler_name"), Some(&json!("euler")));
        assert_eq!(record.get("upscale_sampler_start_at_step"), Some(&json!(6)));
        assert_eq!(record.get("upscale_sampler_add_noise"), Some(&json!("enable")));
    }

    #[test]
    fn lora_stacker_slots_follow_declared_count() {
        let record = extract(json!({
            "20": {"class_type": "LoRA Stacker",
                   "inputs": {"input_mode": "advanced", "lora_count": 2,
                              "lora_name_1": "loras/detail.safetensors", "lora_wt_1": 1.0,
                              "model_str_1": 0.8, "clip_str_1": 0.7,
                              "lora_name_2": "style.pt", "lora_wt_2": 0.5,
                              "model_str_2": 0.6, "clip_str_2": 0.4,
                              "lora_name_3": "unused.safetensors"}},
        }));

        assert_eq!(record.get("lora_stacker"), Some(&json!("LoRA Stacker")));
        assert_eq!(record.get("lora_stacker_mode"), Some(&json!("advanced")));
        assert_eq!(record.get("lora_stacker_count"), Some(&json!(2)));
        assert_eq!(record.get("lora_stacker_lora_name_1"), Some(&json!("detail")));
        assert_eq!(record.get("lora_stacker_lora_model_str_1"), Some(&json!(0.8)));
        assert_eq!(record.get("lora_stacker_lora_name_2"), Some(&json!("style")));
        assert_eq!(record.get("lora_stacker_lora_clip_str_2"), Some(&json!(0.4)));
        assert_eq!(record.get("lora_stacker_lora_name_3"), None);
    }

    #[test]
    fn efficient_loader_needs_both_prompts() {
        let both = extract(json!({
            "1": {"class_type": "Efficient Loader",
                  "inputs": {"positive": "a cat", "negative": "blurry"}},
        }));
        assert_eq!(both.get(POSITIVE_PROMPT), Some(&json!("a cat")));
        assert_eq!(both.get(NEGATIVE_PROMPT), Some(&json!("blurry")));

        let one = extract(json!({
            "1": {"class_type": "Eff. Loader SDXL", "inputs": {"positive": "a cat"}},
        }));
        assert_eq!(one.get(POSITIVE_PROMPT), None);
    }

    #[test]
    fn sampler_prompt_links_keep_the_last_resolved_text() {
        let record = extract(json!({
            "3": {"class_type": "KSampler",
                  "inputs": {"positive": ["6", 0], "negative": ["7", 0]}},
            "6": {"class_type": "CLIPTextEncode", "inputs": {"text": "a cat"}},
            "7": {"class_type": "CLIPTextEncode", "inputs": {"text": "a dog"}},
        }));

        assert_eq!(record.get(POSITIVE_PROMPT), Some(&json!("a dog")));
        assert_eq!(record.get(NEGATIVE_PROMPT), None);
    }

    #[test]
    fn nested_link_text_skips_the_sampler() {
        let record = extract(json!({
            "3": {"class_type": "UltimateSDUpscale",
                  "inputs": {"positive": ["6", 0], "negative": ["7", 0]}},
            "6": {"class_type": "CLIPTextEncode", "inputs": {"text": ["15", 0]}},
            "7": {"class_type": "CLIPTextEncode", "inputs": {"text": "a dog"}},
        }));

        assert_eq!(record.get(POSITIVE_PROMPT), None);
    }

    #[test]
    fn negative_link_text_keeps_the_earlier_positive() {
        let record = extract(json!({
            "3": {"class_type": "KSampler",
                  "inputs": {"positive": ["6", 0], "negative": ["7", 0]}},
            "6": {"class_type": "CLIPTextEncode", "inputs": {"text": "a cat"}},
            "7": {"class_type": "CLIPTextEncode", "inputs": {"text": ["15", 0]}},
        }));

        assert_eq!(record.get(POSITIVE_PROMPT), Some(&json!("a cat")));
    }

    #[test]
    fn long_id_link_text_is_written_through() {
        let record = extract(json!({
            "3": {"class_type": "KSampler",
                  "inputs": {"positive": ["6", 0], "negative": ["7", 0]}},
            "6": {"class_type": "CLIPTextEncode", "inputs": {"text": "a cat"}},
            "7": {"class_type": "CLIPTextEncode", "inputs": {"text": ["123456", 0]}},
        }));

        assert_eq!(record.get(POSITIVE_PROMPT), Some(&json!(["123456", 0])));
    }

    #[test]
    fn numeric_prompt_links_resolve() {
        let record = extract(json!({
            "3": {"class_type": "KSampler", "inputs": {"positive": [6, 0]}},
            "6": {"class_type": "CLIPTextEncode", "inputs": {"text": "a cat"}},
        }));

        assert_eq!(record.get(POSITIVE_PROMPT), Some(&json!("a cat")));
    }

    #[test]
    fn tolerates_malformed_nodes() {
        let record = extract(json!({
            "1": {"class_type": "LoRA Stacker", "inputs": {"lora_count": "many"}},
            "2": {"class_type": "KSampler", "inputs": {"positive": "inline", "negative": ["99", 0]}},
            "3": [1, 2, 3],
        }));

        assert_eq!(record.get("lora_stacker"), Some(&json!("LoRA Stacker")));
        assert_eq!(record.get("lora_stacker_count"), Some(&json!("many")));
        assert_eq!(record.get(POSITIVE_PROMPT), None);
    }
}
