//! Node descriptor command

use lorastack_nodes::{NodeContext, NodeRegistry};

pub fn run(ctx: NodeContext, class: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let registry = NodeRegistry::with_builtin(ctx);

    match class {
        Some(class) => match registry.create(class) {
            Some(node) => println!("{}", serde_json::to_string_pretty(&node.descriptor())?),
            None => {
                println!("Node class '{}' not found.", class);
                println!("Available classes:");
                for (name, display) in registry.display_names() {
                    println!("  - {} ({})", name, display);
                }
            }
        },
        None => {
            println!("{}", serde_json::to_string_pretty(&registry.descriptors())?);
        }
    }

    Ok(())
}
