//! LoRA management commands

use lorastack_lora::{
    LORA_CATEGORY, LoraFolders, LoraLoader, PathResolver, SafetensorsConverter, X_EMBEDDER_LORA_A,
};
use lorastack_nodes::NodeContext;
use std::path::PathBuf;

pub fn list(folders: &LoraFolders) {
    println!("LoRA Search Paths:");
    for path in folders.search_paths(LORA_CATEGORY) {
        println!("  - {}", path.display());
    }

    println!();

    let found = folders.filename_list(LORA_CATEGORY);
    if found.is_empty() {
        println!("No LoRAs found.");
        return;
    }

    println!("Found {} LoRA(s):", found.len());
    for name in found {
        println!("  - {}", name);
    }
}

pub fn inspect(ctx: &NodeContext, name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let path = match ctx.resolve(name) {
        Ok(path) => path,
        Err(_) if PathBuf::from(name).is_file() => PathBuf::from(name),
        Err(e) => {
            println!("{}", e);
            println!("Use 'lorastack lora list' to see available LoRAs.");
            return Ok(());
        }
    };

    let loader = LoraLoader::new(ctx.config.loader_config());
    let file = loader.load(&path)?;
    let mapping = SafetensorsConverter::canonicalize(&file.header);

    println!("LoRA: {}", name);
    println!("==============================");
    println!("Path:    {}", file.path.display());
    println!("Size:    {} bytes", file.bytes.len());
    println!("Hash:    {}", file.hash_hex());
    println!("Tensors: {}", file.header.tensors.len());

    if !file.header.metadata.is_empty() {
        println!();
        println!("Metadata:");
        for (key, value) in &file.header.metadata {
            println!("  {}: {}", key, value);
        }
    }

    println!();
    println!("Tensors:");
    for (key, info) in &file.header.tensors {
        println!("  {} {} {:?}", key, info.dtype, info.shape);
    }

    if let Some(shape) = mapping.get(X_EMBEDDER_LORA_A) {
        println!();
        match shape.get(1) {
            Some(c) if c % 4 == 0 => println!("Input embedding: needs {} latent channels", c / 4),
            _ => println!("Input embedding: unexpected shape {:?}", shape),
        }
    }

    Ok(())
}
