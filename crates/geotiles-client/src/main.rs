//! Command-line loader for 3D Tiles around a location.
//!
//! Fetches the tiles of a dataset (or of any tileset URL or file) around a
//! latitude/longitude, moves them into a local east-north-up frame, cuts
//! optional mask boxes out of them and writes the result as one GLB file.

mod settings;

use std::path::{Path, PathBuf};

use anyhow::{Context, bail, ensure};
use clap::{Args, Parser, Subcommand};
use geotiles::mask::DEFAULT_TOLERANCE;
use geotiles::{
    Attribution, Client, ClientConfig, DatasetKind, LoadContext, LoadRequest, MaskRecord,
    MaskVolume, MemoryCache, MemoryScene, TileLoader, apply_masks, resolve_endpoint,
};
use geotiles_decode::{Aabb, TriangleMesh, write_glb};
use glam::DVec3;
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::settings::Settings;

#[derive(Parser, Debug)]
#[command(name = "geotiles-client", version, about = "Load 3D Tiles around a location")]
struct Cli {
    /// Settings file [default: <config dir>/geotiles/settings.toml]
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch tiles and write them as a GLB file.
    Fetch(FetchArgs),
    /// Print the persisted settings.
    Settings,
}

#[derive(Args, Debug)]
struct FetchArgs {
    /// Latitude in degrees
    #[arg(long, allow_hyphen_values = true)]
    lat: Option<f64>,

    /// Longitude in degrees
    #[arg(long, allow_hyphen_values = true)]
    lon: Option<f64>,

    /// Height above the WGS84 ellipsoid in metres
    #[arg(long, allow_hyphen_values = true)]
    alt: Option<f64>,

    /// Render radius in metres
    #[arg(long)]
    radius: Option<f64>,

    /// Dataset name or ion asset id
    #[arg(long)]
    dataset: Option<DatasetKind>,

    /// Cesium ion access token
    #[arg(long, env = "GEOTILES_ION_TOKEN", hide_env_values = true)]
    ion_token: Option<String>,

    /// Load this tileset URL or file instead of a dataset
    #[arg(long, conflicts_with = "dataset")]
    tileset: Option<String>,

    /// Put the surface below the target at the origin
    #[arg(long, conflicts_with = "no_snap")]
    snap_to_surface: bool,

    /// Put the target itself at the origin
    #[arg(long)]
    no_snap: bool,

    /// Cut an axis-aligned box (scene coordinates) out of the result
    #[arg(long = "mask-box", value_name = "X0,Y0,Z0,X1,Y1,Z1", allow_hyphen_values = true)]
    mask_boxes: Vec<String>,

    /// Also apply the masks saved by the previous fetch
    #[arg(long)]
    reapply_masks: bool,

    /// Scene units per metre
    #[arg(long, default_value_t = 1.0)]
    unit_scale: f64,

    /// Output file
    #[arg(long, short, default_value = "model.glb")]
    out: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let settings_path = match cli.settings {
        Some(path) => path,
        None => Settings::default_path().context("no config directory, pass --settings")?,
    };
    let settings = Settings::load_or_default(&settings_path);

    match cli.command {
        Command::Fetch(args) => fetch(args, settings, &settings_path).await,
        Command::Settings => {
            println!("# {}", settings_path.display());
            print!("{}", toml::to_string_pretty(&settings)?);
            Ok(())
        }
    }
}

async fn fetch(args: FetchArgs, mut settings: Settings, settings_path: &Path) -> anyhow::Result<()> {
    let lat = args.lat.unwrap_or(settings.lat);
    let lon = args.lon.unwrap_or(settings.lon);
    let alt = args.alt.unwrap_or(settings.alt);
    let radius = args.radius.unwrap_or(settings.radius);
    let dataset = args.dataset.unwrap_or(settings.dataset);
    let snap_to_surface = if args.snap_to_surface || args.no_snap {
        args.snap_to_surface
    } else {
        settings.snap_to_surface
    };

    ensure!((-90.0..=90.0).contains(&lat), "latitude {lat} outside [-90, 90]");
    ensure!((-180.0..=180.0).contains(&lon), "longitude {lon} outside [-180, 180]");
    ensure!(radius > 0.0, "radius must be positive");
    ensure!(args.unit_scale > 0.0, "unit scale must be positive");

    let mut masks: Vec<MaskRecord> = Vec::new();
    if args.reapply_masks {
        masks.extend(settings.masks.iter().cloned());
    }
    for text in &args.mask_boxes {
        let aabb = parse_box(text)?;
        masks.push(MaskRecord::new(box_id(&aabb)).named(format!("mask-box {}", masks.len() + 1)));
    }
    let volumes = masks
        .iter()
        .map(|record| {
            let aabb = parse_box(&record.id)?;
            MaskVolume::new(record.clone(), &TriangleMesh::cuboid(&aabb))
                .with_context(|| format!("invalid mask {}", record.id))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut client = Client::with_config(&ClientConfig::default(), MemoryCache::new())?;
    let (root_url, mut ctx) = match &args.tileset {
        Some(tileset) => (tileset_url(tileset)?, LoadContext::default()),
        None => {
            let Some(token) = args.ion_token.as_deref() else {
                bail!("an ion access token is required for {dataset} (--ion-token or GEOTILES_ION_TOKEN)");
            };
            let endpoint = resolve_endpoint(&client, dataset, token)
                .await
                .with_context(|| format!("resolving the {dataset} endpoint"))?;
            client.set_auth(endpoint.auth);
            (endpoint.root_url, LoadContext::new(Attribution::for_dataset(dataset)))
        }
    };

    tracing::info!("fetching {root_url} around ({lat}, {lon}, {alt}) within {radius} m");
    let request = LoadRequest::new(lat, lon, radius)
        .with_alt(alt)
        .with_snap_to_surface(snap_to_surface);
    let mut scene = MemoryScene::with_unit_scale(args.unit_scale);
    let report = TileLoader::new(&client, root_url)
        .load(&mut scene, &request, &mut ctx)
        .await
        .context("loading tiles")?;
    for skipped in &report.skipped {
        tracing::warn!("skipped {}: {}", skipped.uri, skipped.error);
    }

    if !volumes.is_empty() {
        let masked = apply_masks(&mut scene, &mut ctx, &volumes, DEFAULT_TOLERANCE);
        tracing::info!(
            "masks removed {} objects and added {} trimmed pieces",
            masked.removed.len(),
            masked.added.len()
        );
    }

    let meshes: Vec<TriangleMesh> = scene
        .meshes()
        .filter(|(id, _)| ctx.objects().contains(id))
        .map(|(_, mesh)| mesh.clone())
        .collect();
    let opaque = scene
        .opaque()
        .filter(|(id, _)| ctx.objects().contains(id))
        .map(|(_, content)| content.to_glb())
        .collect::<geotiles::Result<Vec<_>>>()
        .context("exporting undecoded tiles")?;
    ensure!(
        !meshes.is_empty() || !opaque.is_empty(),
        "no geometry was loaded around ({lat}, {lon})"
    );

    let attribution = ctx.attribution();
    if !meshes.is_empty() {
        let copyright = (!attribution.is_empty()).then(|| attribution.sources().join(", "));
        let glb = write_glb(&meshes, copyright.as_deref())?;
        std::fs::write(&args.out, &glb).with_context(|| format!("writing {}", args.out.display()))?;
        tracing::info!("wrote {} meshes to {}", meshes.len(), args.out.display());
    }
    // Tiles that could not be read as meshes keep their own encoding.
    for (index, glb) in opaque.iter().enumerate() {
        let path = numbered_path(&args.out, index + 1);
        std::fs::write(&path, glb).with_context(|| format!("writing {}", path.display()))?;
    }
    if !opaque.is_empty() {
        tracing::info!(
            "wrote {} undecoded tiles next to {}",
            opaque.len(),
            args.out.display()
        );
    }
    if !attribution.is_empty() {
        println!("{attribution}");
    }

    settings.lat = lat;
    settings.lon = lon;
    settings.alt = alt;
    settings.radius = radius;
    settings.dataset = dataset;
    settings.snap_to_surface = snap_to_surface;
    settings.masks = masks;
    settings
        .save(settings_path)
        .with_context(|| format!("saving settings to {}", settings_path.display()))?;
    Ok(())
}

/// A tileset given as a URL or as a local path.
fn tileset_url(tileset: &str) -> anyhow::Result<Url> {
    if let Ok(url) = Url::parse(tileset) {
        if url.scheme().len() > 1 {
            return Ok(url);
        }
    }
    // Single-letter schemes are Windows drive letters.
    let path = std::fs::canonicalize(tileset).with_context(|| format!("no tileset at {tileset}"))?;
    Url::from_file_path(&path).map_err(|()| anyhow::anyhow!("cannot express {} as a URL", path.display()))
}

/// Parse `x0,y0,z0,x1,y1,z1` into a box, ordering the corners.
fn parse_box(text: &str) -> anyhow::Result<Aabb> {
    let values = text
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("invalid mask box {text:?}"))?;
    let [x0, y0, z0, x1, y1, z1] = values[..] else {
        bail!("mask box {text:?} needs six values, got {}", values.len());
    };
    let (a, b) = (DVec3::new(x0, y0, z0), DVec3::new(x1, y1, z1));
    let aabb = Aabb::new(a.min(b), a.max(b));
    ensure!(
        (aabb.max - aabb.min).min_element() > 0.0,
        "mask box {text:?} has no volume"
    );
    Ok(aabb)
}

/// `model.glb` -> `model-3.glb`.
fn numbered_path(out: &Path, index: usize) -> PathBuf {
    let stem = out.file_stem().map_or_else(|| "model".into(), |s| s.to_string_lossy());
    let name = match out.extension() {
        Some(ext) => format!("{stem}-{index}.{}", ext.to_string_lossy()),
        None => format!("{stem}-{index}"),
    };
    out.with_file_name(name)
}

fn box_id(aabb: &Aabb) -> String {
    let [x0, y0, z0] = aabb.min.to_array();
    let [x1, y1, z1] = aabb.max.to_array();
    format!("{x0},{y0},{z0},{x1},{y1},{z1}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_box() {
        let aabb = parse_box("10, 0, -1, 0, 10, 5").unwrap();
        assert_eq!(aabb.min, DVec3::new(0.0, 0.0, -1.0));
        assert_eq!(aabb.max, DVec3::new(10.0, 10.0, 5.0));
        assert_eq!(box_id(&aabb), "0,0,-1,10,10,5");
        assert_eq!(parse_box(&box_id(&aabb)).unwrap(), aabb);

        assert!(parse_box("1,2,3").is_err());
        assert!(parse_box("a,b,c,d,e,f").is_err());
        assert!(parse_box("0,0,0,1,1,0").is_err());
    }

    #[test]
    fn test_numbered_path() {
        assert_eq!(numbered_path(Path::new("out/model.glb"), 3), PathBuf::from("out/model-3.glb"));
        assert_eq!(numbered_path(Path::new("scene"), 1), PathBuf::from("scene-1"));
    }

    #[test]
    fn test_tileset_url() {
        assert_eq!(
            tileset_url("https://example.com/t/tileset.json").unwrap().as_str(),
            "https://example.com/t/tileset.json"
        );

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("tileset.json");
        std::fs::write(&file, "{}").unwrap();
        let url = tileset_url(file.to_str().unwrap()).unwrap();
        assert_eq!(url.scheme(), "file");
        assert!(url.path().ends_with("/tileset.json"));
        assert!(tileset_url(dir.path().join("missing.json").to_str().unwrap()).is_err());
    }

    #[test]
    fn test_cli_parses_fetch() {
        let cli = Cli::try_parse_from([
            "geotiles-client",
            "fetch",
            "--lat",
            "-33.85",
            "--lon",
            "151.2",
            "--dataset",
            "96188",
            "--mask-box",
            "-5,-5,-1,5,5,20",
            "--no-snap",
        ])
        .unwrap();
        let Command::Fetch(args) = cli.command else {
            panic!("expected fetch");
        };
        assert_eq!(args.lat, Some(-33.85));
        assert_eq!(args.dataset, Some(DatasetKind::CesiumOsmBuildings));
        assert_eq!(args.mask_boxes, ["-5,-5,-1,5,5,20"]);
        assert!(args.no_snap && !args.snap_to_surface);
        assert_eq!(args.out, PathBuf::from("model.glb"));
    }
}
