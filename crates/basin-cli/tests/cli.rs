//! End-to-end runs of the `watershed` binary.

#![allow(clippy::unwrap_used, clippy::float_cmp)]

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use image::GrayImage;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::{TiffEncoder, colortype};

fn write_channel(dir: &Path, slices: usize, pixels: &[u8]) {
    fs::create_dir_all(dir).unwrap();
    for z in 0..slices {
        GrayImage::from_raw(3, 2, pixels.to_vec())
            .unwrap()
            .save(dir.join(format!("aff_{z:03}.png")))
            .unwrap();
    }
}

fn watershed(root: &Path, extra: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_watershed"))
        .arg(root.join("x"))
        .arg(root.join("y"))
        .arg(root.join("z"))
        .args(["0.3", "0.8", "0.1", "25"])
        .arg("--output-dir")
        .arg(root.join("out"))
        .args(extra)
        .output()
        .unwrap()
}

#[test]
fn segments_and_writes_outputs() {
    let root = tempfile::tempdir().unwrap();
    // x edges join columns 0 and 1; column 2 stands alone.
    write_channel(&root.path().join("x"), 2, &[255, 0, 0, 255, 0, 0]);
    write_channel(&root.path().join("y"), 2, &[255; 6]);
    write_channel(&root.path().join("z"), 2, &[255; 6]);

    let output = watershed(root.path(), &["--format", "png"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Segmentation Diagnostics Report"));

    let out = root.path().join("out");
    assert!(out.join("watershed_00000_0.3_0.8_0.1_25.png").is_file());
    assert!(out.join("watershed_00001_0.3_0.8_0.1_25.png").is_file());
    let sidecar = fs::read_to_string(out.join("watershed_params.json")).unwrap();
    assert!(sidecar.contains("\"num_regions\": 2"));
}

fn write_float_channel(dir: &Path, pixels: &[f32]) {
    fs::create_dir_all(dir).unwrap();
    let file = fs::File::create(dir.join("aff_000.tif")).unwrap();
    TiffEncoder::new(file)
        .unwrap()
        .write_image::<colortype::Gray32Float>(3, 2, pixels)
        .unwrap();
}

#[test]
fn float_tiff_in_float_tiff_out() {
    let root = tempfile::tempdir().unwrap();
    // Raw float weights: 0.85 joins columns 0 and 1, 0.2 keeps column 2 apart.
    write_float_channel(&root.path().join("x"), &[0.85, 0.2, 0.0, 0.85, 0.2, 0.0]);
    write_float_channel(&root.path().join("y"), &[0.9; 6]);
    write_float_channel(&root.path().join("z"), &[0.0; 6]);

    let output = watershed(root.path(), &["--encoding", "float32"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let slice = root.path().join("out/watershed_00000_0.3_0.8_0.1_25.tif");
    let mut decoder = Decoder::new(fs::File::open(slice).unwrap()).unwrap();
    let DecodingResult::F32(labels) = decoder.read_image().unwrap() else {
        unreachable!("float32 encoding writes f32 samples");
    };
    assert_eq!(labels, vec![1.0, 1.0, 2.0, 1.0, 1.0, 2.0]);
}

#[test]
fn json_flag_prints_diagnostics_json() {
    let root = tempfile::tempdir().unwrap();
    for axis in ["x", "y", "z"] {
        write_channel(&root.path().join(axis), 1, &[255; 6]);
    }
    let output = watershed(root.path(), &["--json"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.trim_start().starts_with('{'));
    assert!(stdout.contains("\"watershed\""));
}

#[test]
fn mismatched_file_counts_exit_with_failure() {
    let root = tempfile::tempdir().unwrap();
    write_channel(&root.path().join("x"), 2, &[0; 6]);
    write_channel(&root.path().join("y"), 2, &[0; 6]);
    write_channel(&root.path().join("z"), 1, &[0; 6]);

    let output = watershed(root.path(), &[]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("directories contain different number of files"));
}

#[test]
fn empty_directories_exit_with_failure() {
    let root = tempfile::tempdir().unwrap();
    for axis in ["x", "y", "z"] {
        fs::create_dir_all(root.path().join(axis)).unwrap();
    }
    let output = watershed(root.path(), &[]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("directories contain no files"));
}
