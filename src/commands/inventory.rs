use anyhow::{Context, Result};
use tracing::info;

use crate::cli::InventoryArgs;
use crate::commands::resolve_layout;
use crate::ingest::inventory;
use crate::util::write_json_pretty;

pub const INVENTORY_FILENAME: &str = "inventory.json";

pub fn run(args: InventoryArgs) -> Result<()> {
    let layout = resolve_layout(&args.folder)?;
    let input_dir = layout.input_dir();

    let assets = inventory::scan(&input_dir)
        .with_context(|| format!("failed to inventory {}; run `ingest` first", input_dir.display()))?;

    for asset in &assets {
        info!(
            path = %asset.path,
            kind = asset.kind.as_str(),
            format = %asset.format,
            size = asset.size,
            note = %asset.note.as_deref().unwrap_or_default(),
            "asset"
        );
    }

    if args.dry_run {
        info!(asset_count = assets.len(), source = %input_dir.display(), "inventory dry-run complete");
        return Ok(());
    }

    let path = layout.ingested_dir().join(INVENTORY_FILENAME);
    write_json_pretty(&path, &assets)?;
    info!(path = %path.display(), asset_count = assets.len(), "wrote inventory");

    Ok(())
}
