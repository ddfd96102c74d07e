// Build script: compiles GLSL sources in resources/shaders to SPIR-V under target/shaders

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

const SHADER_DIR: &str = "../../resources/shaders";
const OUTPUT_DIR: &str = "../../target/shaders";
const STAGES: [&str; 2] = ["vert", "frag"];

fn main() {
    println!("cargo:rerun-if-changed={SHADER_DIR}");
    println!("cargo:rerun-if-env-changed=VULKAN_SDK");
    println!("cargo:rerun-if-env-changed=SKIP_SHADERS");

    if env::var_os("SKIP_SHADERS").is_some() {
        eprintln!("info: SKIP_SHADERS set, not compiling shaders");
        return;
    }

    let Some(glslc) = find_glslc() else {
        eprintln!("warning: glslc not found (set VULKAN_SDK); using previously compiled shaders");
        return;
    };

    let output_dir = PathBuf::from(OUTPUT_DIR);
    if let Err(e) = std::fs::create_dir_all(&output_dir) {
        eprintln!("warning: Failed to create {output_dir:?}: {e}");
        return;
    }

    let sources = match std::fs::read_dir(SHADER_DIR) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| STAGES.contains(&ext))
            })
            .collect::<Vec<_>>(),
        Err(_) => {
            eprintln!("info: No shader directory at {SHADER_DIR}");
            return;
        }
    };

    let mut compiled = 0;
    for source in &sources {
        let Some(stem) = source.file_stem() else { continue };
        let output = output_dir.join(stem).with_extension("spv");

        if is_up_to_date(source, &output) {
            continue;
        }

        let status = Command::new(&glslc).arg(source).arg("-o").arg(&output).status();
        match status {
            Ok(status) if status.success() => compiled += 1,
            Ok(status) => panic!("glslc failed for {source:?} with {status}"),
            Err(e) => panic!("Failed to run {glslc:?}: {e}"),
        }
    }

    eprintln!("info: {compiled} of {} shader(s) compiled", sources.len());
}

fn find_glslc() -> Option<PathBuf> {
    let sdk = env::var_os("VULKAN_SDK")?;
    let name = if cfg!(target_os = "windows") { "Bin/glslc.exe" } else { "bin/glslc" };
    let glslc = Path::new(&sdk).join(name);
    glslc.exists().then_some(glslc)
}

fn is_up_to_date(source: &Path, output: &Path) -> bool {
    let modified = |path: &Path| std::fs::metadata(path).and_then(|meta| meta.modified()).ok();
    matches!((modified(source), modified(output)), (Some(src), Some(out)) if out >= src)
}
