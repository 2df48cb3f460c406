use anyhow::Context;
use provision_core::{environment::Platform, io, paths, scaffold};
use std::path::Path;

pub fn run(root: &Path, platform: Option<Platform>) -> anyhow::Result<()> {
    let project_name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project".to_string());
    let platform = platform.unwrap_or_else(Platform::current);

    println!("Initializing provisioning in: {}", root.display());

    for dir in [paths::PROVISION_DIR, paths::LOGS_DIR] {
        let p = root.join(dir);
        io::ensure_dir(&p).with_context(|| format!("failed to create {}", p.display()))?;
    }

    let config_path = paths::config_path(root);
    if !config_path.exists() {
        let cfg = scaffold::default_config(&project_name, platform);
        cfg.save(root).context("failed to write config.yaml")?;
        println!("  created: {} ({platform} stack)", paths::CONFIG_FILE);
    } else {
        println!("  exists:  {}", paths::CONFIG_FILE);
    }

    println!("\nNext: edit the variables in {}, then run 'provision check'.", paths::CONFIG_FILE);
    Ok(())
}
