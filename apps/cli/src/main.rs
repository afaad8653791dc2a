use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use ttsbackup::selection::SelectionTree;
use ttsbackup::{
    AssetStatus, DownloadConfig, ExportOptions, ExportService, ObjectNode, ProgressEvent,
    SaveDocument, SelectionSnapshot, SettingsStore, UrlRewriteRule,
};

#[derive(Parser, Debug)]
#[command(name = "ttsbackup", about = "Back up tabletop save assets into a self-contained folder")]
struct Cli {
    /// Path to the settings file (defaults to ./ttsbackup-settings.json)
    #[arg(long)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the object tree of a save file
    Tree { save: PathBuf },
    /// List the asset URLs a save references
    Scan {
        save: PathBuf,
        /// Restrict to these object GUIDs (default: everything)
        #[arg(long)]
        guid: Vec<String>,
    },
    /// Download assets, rewrite the save, and write a manifest
    Export {
        save: PathBuf,
        /// Output folder for the archived assets and patched save
        #[arg(short, long)]
        output: PathBuf,
        /// Name for the exported save (default: original save name)
        #[arg(long, default_value = "")]
        name: String,
        /// Restrict to these object GUIDs (default: everything)
        #[arg(long)]
        guid: Vec<String>,
        /// Rewrite URLs to <base>/<file> instead of local paths
        #[arg(long)]
        base_url: Option<String>,
        /// Skip downloading; only rewrite against the base URL
        #[arg(long)]
        no_download: bool,
        /// Archive identical content once even across different URLs
        #[arg(long)]
        collapse: Option<bool>,
        #[arg(long)]
        max_concurrency: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ttsbackup=info,cli=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let settings_path = cli
        .settings
        .clone()
        .unwrap_or_else(|| PathBuf::from("ttsbackup-settings.json"));

    match cli.command {
        Commands::Tree { save } => tree(&save).await,
        Commands::Scan { save, guid } => scan(&save, &guid).await,
        Commands::Export {
            save,
            output,
            name,
            guid,
            base_url,
            no_download,
            collapse,
            max_concurrency,
        } => {
            export(
                settings_path,
                save,
                output,
                name,
                guid,
                base_url,
                no_download,
                collapse,
                max_concurrency,
            )
            .await
        }
    }
}

async fn load_save(path: &PathBuf) -> Result<SaveDocument> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading save file {}", path.display()))?;
    ttsbackup::save::parse(&text).context("parsing save file")
}

async fn tree(save: &PathBuf) -> Result<()> {
    let document = load_save(save).await?;
    println!(
        "{} ({} objects)",
        document.original_name.as_deref().unwrap_or("<unnamed>"),
        document.node_count()
    );
    for root in &document.roots {
        print_node(root, 1);
    }
    Ok(())
}

fn print_node(node: &ObjectNode, depth: usize) {
    let marker = if node.is_state { "~" } else { "-" };
    println!(
        "{}{} {} [{}]{}",
        "  ".repeat(depth),
        marker,
        node.display_name(),
        node.guid,
        if node.has_own_assets { " *" } else { "" }
    );
    for child in &node.children {
        print_node(child, depth + 1);
    }
}

/// Snapshot of everything, or of the named GUIDs when any were given.
fn snapshot_for(document: &SaveDocument, guids: &[String]) -> Result<SelectionSnapshot> {
    if guids.is_empty() {
        return Ok(SelectionSnapshot::all());
    }
    let mut selection = SelectionTree::build(&document.roots);
    for guid in guids {
        let id = selection
            .find_by_guid(guid)
            .with_context(|| format!("no object with GUID {guid}"))?;
        if !selection.set_included(id, true, &mut |_| true) {
            eprintln!("warning: {guid} is a locked state alternative; select its owning object instead");
        }
    }
    let snapshot = selection.snapshot();
    // An empty snapshot means "everything"; refuse to silently widen.
    anyhow::ensure!(
        !snapshot.is_empty(),
        "none of the requested GUIDs could be selected"
    );
    Ok(snapshot)
}

async fn scan(save: &PathBuf, guids: &[String]) -> Result<()> {
    let document = load_save(save).await?;
    let selection = snapshot_for(&document, guids)?;
    let references =
        ttsbackup::scan::scan_assets(&document, &selection, &CancellationToken::new())?;
    for reference in &references {
        println!(
            "{:?}\t{}\t({} {})",
            reference.kind, reference.original_url, reference.source_guid, reference.source_name
        );
    }
    eprintln!("{} asset references", references.len());
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn export(
    settings_path: PathBuf,
    save: PathBuf,
    output: PathBuf,
    name: String,
    guids: Vec<String>,
    base_url: Option<String>,
    no_download: bool,
    collapse: Option<bool>,
    max_concurrency: Option<usize>,
) -> Result<()> {
    let mut store = SettingsStore::new(settings_path);
    store.load().await.context("loading settings")?;

    let document = load_save(&save).await?;
    let selection = snapshot_for(&document, &guids)?;

    let defaults = store.current();
    let options = ExportOptions {
        output_folder: output,
        new_save_name: name,
        download_assets: !no_download && defaults.download_assets_by_default,
        collapse_shared_assets: collapse.unwrap_or(defaults.collapse_shared_assets_by_default),
        max_concurrency: max_concurrency.unwrap_or(defaults.max_concurrency),
        ..ExportOptions::default()
    };
    let rule = UrlRewriteRule {
        global_base_url: base_url,
    };

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("cancelling...");
            ctrl_c_cancel.cancel();
        }
    });

    let progress = Arc::new(|event: ProgressEvent| match event {
        ProgressEvent::StageChanged { stage } => println!("== {stage}"),
        ProgressEvent::AssetSettled {
            url,
            status,
            completed,
            total,
            ..
        } => {
            let tag = match status {
                AssetStatus::Downloaded => "dl",
                AssetStatus::ReusedFromCache => "dup-content",
                AssetStatus::SkippedDuplicate => "dup-url",
                AssetStatus::Failed => "FAIL",
                AssetStatus::LocalPathWarning => "local",
                AssetStatus::Pending => "...",
            };
            println!("[{completed}/{total}] {tag} {url}");
        }
        ProgressEvent::DownloadStarted { .. } => {}
    });

    let service = ExportService::new(DownloadConfig::default())?;
    let manifest = service
        .export(
            &save,
            &document,
            &selection,
            &rule,
            &options,
            Some(progress),
            cancel,
        )
        .await?;

    let failed = manifest
        .assets
        .iter()
        .filter(|a| a.status == AssetStatus::Failed)
        .count();
    println!(
        "exported {} -> {} ({} assets, {} failed)",
        save.display(),
        manifest.new_save_path,
        manifest.assets.len(),
        failed
    );

    store.current_mut().last_save_path = save.display().to_string();
    store.current_mut().last_output_folder = options.output_folder.display().to_string();
    if let Err(e) = store.save().await {
        eprintln!("warning: could not persist settings: {e}");
    }

    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
