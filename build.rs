// Build script to compile GLSL shaders to SPIR-V

use std::path::Path;
use std::process::Command;

const SHADERS: [&str; 2] = ["shaders/mesh.vert", "shaders/mesh.frag"];

fn main() {
    println!("cargo:rerun-if-changed=shaders/mesh.vert");
    println!("cargo:rerun-if-changed=shaders/mesh.frag");

    // Compile shaders using glslc (part of Vulkan SDK)
    for input in SHADERS {
        compile_shader(input, &format!("{}.spv", input));
    }
}

fn compile_shader(input: &str, output: &str) {
    let result = Command::new("glslc")
        .arg(Path::new(input))
        .arg("-o")
        .arg(Path::new(output))
        .status();

    match result {
        Ok(status) if status.success() => {}
        Ok(status) => {
            panic!("Failed to compile {}: exit code {:?}", input, status.code());
        }
        Err(e) => {
            // The renderer reports missing .spv files at startup
            println!("cargo:warning=glslc not found ({}), {} not compiled", e, input);
            println!("cargo:warning=  glslc {} -o {}", input, output);
        }
    }
}
