//! Stack normalisation command

use lorastack_lora::{InputMode, InputValue, LoraStack, NodeInputs, stack};
use lorastack_nodes::NodeContext;
use serde::Serialize;
use std::path::PathBuf;

pub struct StackRequest {
    pub inputs: Option<PathBuf>,
    pub slots: Vec<String>,
    pub count: usize,
    pub mode: InputMode,
    pub resolve: bool,
}

#[derive(Serialize)]
struct ResolvedEntry {
    name: String,
    strength: f64,
    path: PathBuf,
}

/// Parse a `NAME:WEIGHT` slot argument; the weight defaults to 1.0
fn parse_slot(slot: &str) -> Result<(String, f64), String> {
    match slot.rsplit_once(':') {
        Some((name, weight)) => weight
            .trim()
            .parse()
            .map(|w| (name.to_string(), w))
            .map_err(|_| format!("invalid weight in slot '{}'", slot)),
        None => Ok((slot.to_string(), 1.0)),
    }
}

fn read_inputs(request: &StackRequest) -> Result<NodeInputs, Box<dyn std::error::Error>> {
    let mut inputs = match &request.inputs {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => NodeInputs::new(),
    };

    for (i, slot) in request.slots.iter().enumerate() {
        let (name, weight) = parse_slot(slot)?;
        let weight_key = match request.mode {
            InputMode::Simple => stack::lora_weight_key(i + 1),
            InputMode::Advanced => stack::model_strength_key(i + 1),
        };
        inputs.insert(stack::lora_name_key(i + 1), InputValue::Text(name));
        inputs.insert(weight_key, InputValue::Float(weight));
    }

    Ok(inputs)
}

pub fn run(ctx: &NodeContext, request: &StackRequest) -> Result<(), Box<dyn std::error::Error>> {
    let inputs = read_inputs(request)?;
    let stack = LoraStack::from_inputs(
        &inputs,
        request.count,
        request.mode,
        &ctx.config.normalize,
    );

    if request.resolve {
        let resolved = ctx
            .resolve_stack(&stack)?
            .into_iter()
            .zip(stack.iter())
            .map(|((path, strength), entry)| ResolvedEntry {
                name: entry.name.clone(),
                strength,
                path,
            })
            .collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&resolved)?);
    } else {
        println!("{}", serde_json::to_string_pretty(&stack)?);
    }

    Ok(())
}
