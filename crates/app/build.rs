// Compiles the GLSL sources under <workspace>/shaders into SPIR-V under
// <workspace>/shaders/spirv, named after the source (gbuffer.vert -> gbuffer.vert.spv).
//
// A missing compiler or a failed compile is reported as a cargo warning; the
// binary still builds and fails at startup if a shader is unavailable.

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

const STAGE_EXTENSIONS: [&str; 3] = ["vert", "frag", "comp"];

fn find_glslc() -> Option<PathBuf> {
    if let Ok(sdk) = env::var("VULKAN_SDK") {
        let bin = if cfg!(target_os = "windows") {
            Path::new(&sdk).join("Bin").join("glslc.exe")
        } else {
            Path::new(&sdk).join("bin").join("glslc")
        };
        if bin.exists() {
            return Some(bin);
        }
    }

    // Fall back to PATH
    let probe = Command::new("glslc").arg("--version").output();
    match probe {
        Ok(output) if output.status.success() => Some(PathBuf::from("glslc")),
        _ => None,
    }
}

fn needs_compile(source: &Path, output: &Path) -> bool {
    let modified = |p: &Path| std::fs::metadata(p).and_then(|m| m.modified()).ok();
    match (modified(source), modified(output)) {
        (Some(src), Some(dst)) => src > dst,
        _ => true,
    }
}

fn main() {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap_or_default());
    let shader_dir = manifest_dir.join("../../shaders");
    let target_dir = shader_dir.join("spirv");

    println!("cargo:rerun-if-changed={}", shader_dir.display());
    println!("cargo:rerun-if-env-changed=VULKAN_SDK");

    if env::var("SKIP_SHADERS").is_ok() {
        return;
    }

    let Some(glslc) = find_glslc() else {
        println!("cargo:warning=glslc not found (set VULKAN_SDK or add it to PATH); shaders were not compiled");
        return;
    };

    let entries = match std::fs::read_dir(&shader_dir) {
        Ok(entries) => entries,
        Err(e) => {
            println!("cargo:warning=cannot read {}: {}", shader_dir.display(), e);
            return;
        }
    };

    if let Err(e) = std::fs::create_dir_all(&target_dir) {
        println!("cargo:warning=cannot create {}: {}", target_dir.display(), e);
        return;
    }

    for entry in entries.flatten() {
        let path = entry.path();
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if !STAGE_EXTENSIONS.contains(&ext) {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        let output = target_dir.join(format!("{}.spv", file_name));
        if !needs_compile(&path, &output) {
            continue;
        }

        let status = Command::new(&glslc)
            .arg("--target-env=vulkan1.3")
            .arg(&path)
            .arg("-o")
            .arg(&output)
            .status();

        match status {
            Ok(s) if s.success() => {}
            Ok(s) => println!(
                "cargo:warning=glslc failed for {} (exit code {})",
                file_name,
                s.code().unwrap_or(-1)
            ),
            Err(e) => println!("cargo:warning=failed to run glslc for {}: {}", file_name, e),
        }
    }
}
