//! CLI tool to run a saved draft screenshot through screen location and card ranking.
//! Usage: cargo run -p arena-vision --features cli --bin analyze_draft -- \
//!            <screenshot.png> <anchor_template.png> <art_dir> [output_dir]

use arena_data::CardId;
use arena_vision::{CandidateMatcher, HistogramIndex, LocatorConfig, ScreenLocator};
use std::path::PathBuf;
use std::sync::Arc;

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 4 {
        eprintln!(
            "Usage: {} <screenshot.png> <anchor_template.png> <art_dir> [output_dir]",
            args[0]
        );
        std::process::exit(1);
    }

    let input_path = PathBuf::from(&args[1]);
    let template_path = PathBuf::from(&args[2]);
    let art_dir = PathBuf::from(&args[3]);
    let output_dir = if args.len() >= 5 {
        PathBuf::from(&args[4])
    } else {
        PathBuf::from("./debug_output")
    };
    let _ = std::fs::create_dir_all(&output_dir);

    println!("Loading image: {}", input_path.display());
    let img = image::open(&input_path)
        .expect("Failed to open image")
        .to_rgba8();
    println!("Image size: {}x{}", img.width(), img.height());

    println!("\n=== Screen Location ===");
    let locator = ScreenLocator::load(&template_path, LocatorConfig::default())
        .expect("Failed to load anchor template");
    let Some(geometry) = locator.locate(std::slice::from_ref(&img)) else {
        println!("Draft screen NOT FOUND");
        return;
    };
    println!(
        "Scale {:.2}, confidence {:.3}",
        geometry.scale, geometry.confidence
    );

    println!("\n=== Card Ranking ===");
    let ids: Vec<CardId> = std::fs::read_dir(&art_dir)
        .expect("Failed to read art dir")
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let path = e.path();
            if path.extension()? != "png" {
                return None;
            }
            Some(CardId::from_file_stem(path.file_stem()?.to_str()?))
        })
        .collect();
    let index = Arc::new(HistogramIndex::new());
    index.load_cached_art(&art_dir, &ids, false);
    let matcher = CandidateMatcher::new(index, 5);

    for (i, rect) in geometry.rects.iter().enumerate() {
        println!(
            "Slot {}: x={} y={} w={} h={}",
            i, rect.x, rect.y, rect.width, rect.height
        );
        let crop = arena_capture::crop_rect(&img, rect);
        let _ = crop.save(output_dir.join(format!("slot_{}.png", i)));
        for candidate in matcher.classify(&crop, &ids) {
            println!("    {:<24} {:.3}", candidate.id.to_string(), candidate.distance);
        }
    }

    println!("\nDebug images saved to: {}", output_dir.display());
}
