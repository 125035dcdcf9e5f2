//! Integration tests for model loading.

use std::path::Path;

use lantern_resources::{Model, ResourceError};

// Triangle with positions only (no normals, UVs or indices), embedded as a
// base64 data URI.
const MINIMAL_TRIANGLE: &str = r#"{
  "asset": { "version": "2.0" },
  "scene": 0,
  "scenes": [ { "nodes": [0] } ],
  "nodes": [ { "mesh": 0 } ],
  "meshes": [ { "name": "tri", "primitives": [ { "attributes": { "POSITION": 0 } } ] } ],
  "buffers": [ {
    "byteLength": 36,
    "uri": "data:application/octet-stream;base64,AAAAAAAAAAAAAAAAAACAPwAAAAAAAAAAAAAAAAAAgD8AAAAA"
  } ],
  "bufferViews": [ { "buffer": 0, "byteOffset": 0, "byteLength": 36 } ],
  "accessors": [ {
    "bufferView": 0,
    "componentType": 5126,
    "count": 3,
    "type": "VEC3",
    "min": [0.0, 0.0, 0.0],
    "max": [1.0, 1.0, 0.0]
  } ]
}"#;

#[test]
fn test_load_minimal_triangle_fills_missing_attributes() {
    let model = Model::from_slice(MINIMAL_TRIANGLE.as_bytes()).expect("Failed to load triangle");

    assert_eq!(model.meshes.len(), 1);
    let mesh = &model.meshes[0];
    assert_eq!(mesh.positions.len(), 3);
    assert_eq!(mesh.indices, vec![0, 1, 2]);
    assert_eq!(mesh.normals.len(), 3);
    assert_eq!(mesh.tex_coords, vec![[0.0, 0.0]; 3]);

    // Counter-clockwise in the XY plane
    for normal in &mesh.normals {
        assert!((normal.z - 1.0).abs() < 1e-5);
    }

    assert_eq!(model.total_vertex_count(), 3);
    assert_eq!(model.total_triangle_count(), 1);
    assert_eq!(model.bounds.max.x, 1.0);
    assert_eq!(model.bounds.max.y, 1.0);
}

#[test]
fn test_missing_file_is_reported() {
    let result = Model::load(Path::new("does/not/exist.gltf"));
    assert!(matches!(result, Err(ResourceError::FileNotFound(_))));
}

#[test]
fn test_garbage_is_rejected() {
    let result = Model::from_slice(b"not a gltf document");
    assert!(matches!(result, Err(ResourceError::GltfLoad { .. })));
}

#[test]
fn test_load_asset_model() {
    let model_path = Path::new("../../assets/models/scene.glb");

    // CI may not have assets
    if !model_path.exists() {
        println!("Skipping test: model file not found at {:?}", model_path);
        return;
    }

    let model = Model::load(model_path).expect("Failed to load glTF model");
    assert!(!model.meshes.is_empty());

    for (i, mesh) in model.meshes.iter().enumerate() {
        assert!(!mesh.positions.is_empty(), "Mesh {} should have positions", i);
        assert_eq!(mesh.normals.len(), mesh.positions.len());
        assert_eq!(mesh.tex_coords.len(), mesh.positions.len());
        assert!(mesh.validate().is_ok());
    }

    assert!(model.bounds.min.x <= model.bounds.max.x);
    println!(
        "Loaded {} meshes, {} vertices, {} triangles",
        model.meshes.len(),
        model.total_vertex_count(),
        model.total_triangle_count()
    );
}
