// Mesh models: OBJ import and construction
//
// Import produces plain CPU-side data. `build_model` turns it into registry
// entries through a `ModelSink`, resolving each material to a texture once.

use crate::error::{RenderError, RenderResult};
use crate::registry::{MeshHandle, ModelHandle, TextureHandle, SENTINEL_TEXTURE};
use crate::texture::texture_file_name;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3};
use std::collections::HashMap;
use std::path::Path;

/// Interleaved vertex matching mesh.vert's inputs.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: Vec3,
    pub col: Vec3,
    pub tex: Vec2,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportedMesh {
    pub name: String,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub material: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportedMaterial {
    pub diffuse_texture: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportedScene {
    pub meshes: Vec<ImportedMesh>,
    pub materials: Vec<ImportedMaterial>,
}

/// Load an OBJ file (and its MTL, if any).
///
/// Faces are triangulated and re-indexed so positions and UVs share one
/// index. V is flipped for Vulkan's top-left texture origin.
pub fn load_obj(path: &Path) -> RenderResult<ImportedScene> {
    let options = tobj::LoadOptions {
        triangulate: true,
        single_index: true,
        ..Default::default()
    };

    let (models, materials) =
        tobj::load_obj(path, &options).map_err(|e| RenderError::asset(path, e))?;

    let materials = match materials {
        Ok(materials) => materials,
        Err(e) => {
            log::warn!("No materials for {:?}: {}", path, e);
            Vec::new()
        }
    };

    let meshes = models
        .into_iter()
        .map(|model| {
            let mesh = model.mesh;
            let vertex_count = mesh.positions.len() / 3;
            let vertices = (0..vertex_count)
                .map(|i| {
                    let tex = if mesh.texcoords.len() >= (i + 1) * 2 {
                        Vec2::new(mesh.texcoords[i * 2], 1.0 - mesh.texcoords[i * 2 + 1])
                    } else {
                        Vec2::ZERO
                    };
                    Vertex {
                        pos: Vec3::new(
                            mesh.positions[i * 3],
                            mesh.positions[i * 3 + 1],
                            mesh.positions[i * 3 + 2],
                        ),
                        col: Vec3::ONE,
                        tex,
                    }
                })
                .collect();

            ImportedMesh {
                name: model.name,
                vertices,
                indices: mesh.indices,
                material: mesh.material_id,
            }
        })
        .collect::<Vec<_>>();

    log::info!(
        "Imported {:?}: {} meshes, {} materials",
        path,
        meshes.len(),
        materials.len()
    );

    Ok(ImportedScene {
        meshes,
        materials: materials
            .into_iter()
            .map(|m| ImportedMaterial {
                diffuse_texture: m.diffuse_texture.filter(|t| !t.is_empty()),
            })
            .collect(),
    })
}

/// An ordered set of meshes sharing one coarse transform.
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    pub meshes: Vec<MeshHandle>,
    pub transform: Mat4,
}

impl Model {
    pub fn new(meshes: Vec<MeshHandle>) -> Self {
        Self {
            meshes,
            transform: Mat4::IDENTITY,
        }
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }
}

/// Where `build_model` puts what it creates.
pub trait ModelSink {
    /// Load a texture by file name (no directories).
    fn load_texture(&mut self, file_name: &str) -> RenderResult<TextureHandle>;
    fn add_mesh(&mut self, mesh: &ImportedMesh, texture: TextureHandle) -> RenderResult<MeshHandle>;
    fn add_model(&mut self, model: Model) -> ModelHandle;
}

/// Maps materials to textures, loading each distinct file once.
#[derive(Default)]
pub struct MaterialResolver {
    by_material: HashMap<usize, TextureHandle>,
    by_file: HashMap<String, TextureHandle>,
}

impl MaterialResolver {
    pub fn resolve(
        &mut self,
        materials: &[ImportedMaterial],
        material: Option<usize>,
        sink: &mut impl ModelSink,
    ) -> RenderResult<TextureHandle> {
        let Some(index) = material else {
            return Ok(SENTINEL_TEXTURE);
        };
        if let Some(&handle) = self.by_material.get(&index) {
            return Ok(handle);
        }

        let file = materials
            .get(index)
            .and_then(|m| m.diffuse_texture.as_deref())
            .map(texture_file_name);

        let handle = match file {
            None => SENTINEL_TEXTURE,
            Some(file) => match self.by_file.get(file) {
                Some(&handle) => handle,
                None => {
                    let handle = sink.load_texture(file)?;
                    self.by_file.insert(file.to_string(), handle);
                    handle
                }
            },
        };

        self.by_material.insert(index, handle);
        Ok(handle)
    }
}

/// Upload every mesh of `scene` and register them as one model.
pub fn build_model(scene: &ImportedScene, sink: &mut impl ModelSink) -> RenderResult<ModelHandle> {
    let mut resolver = MaterialResolver::default();
    let mut meshes = Vec::with_capacity(scene.meshes.len());

    for mesh in &scene.meshes {
        if mesh.vertices.is_empty() || mesh.indices.is_empty() {
            log::warn!("Skipping empty mesh '{}'", mesh.name);
            continue;
        }
        let texture = resolver.resolve(&scene.materials, mesh.material, sink)?;
        meshes.push(sink.add_mesh(mesh, texture)?);
    }

    Ok(sink.add_model(Model::new(meshes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Handle, ResourceTable};

    /// Records what a real sink would upload.
    #[derive(Default)]
    struct FakeSink {
        textures: Vec<String>,
        meshes: Vec<(String, TextureHandle)>,
        models: ResourceTable<Model>,
        fail_texture: Option<&'static str>,
    }

    impl ModelSink for FakeSink {
        fn load_texture(&mut self, file_name: &str) -> RenderResult<TextureHandle> {
            if self.fail_texture == Some(file_name) {
                return Err(RenderError::asset(file_name, "missing"));
            }
            self.textures.push(file_name.to_string());
            // Slot 0 is the sentinel
            Ok(Handle::new(self.textures.len() as u32))
        }

        fn add_mesh(
            &mut self,
            mesh: &ImportedMesh,
            texture: TextureHandle,
        ) -> RenderResult<MeshHandle> {
            self.meshes.push((mesh.name.clone(), texture));
            Ok(Handle::new(self.meshes.len() as u32 - 1))
        }

        fn add_model(&mut self, model: Model) -> ModelHandle {
            self.models.push(model)
        }
    }

    fn triangle(name: &str, material: Option<usize>) -> ImportedMesh {
        ImportedMesh {
            name: name.to_string(),
            vertices: vec![Vertex::zeroed(); 3],
            indices: vec![0, 1, 2],
            material,
        }
    }

    fn material(texture: Option<&str>) -> ImportedMaterial {
        ImportedMaterial {
            diffuse_texture: texture.map(str::to_string),
        }
    }

    #[test]
    fn two_meshes_sharing_a_texture_load_it_once() {
        let scene = ImportedScene {
            meshes: vec![triangle("body", Some(0)), triangle("wing", Some(1))],
            materials: vec![
                material(Some("plane.png")),
                material(Some("C:\\work\\plane.png")),
            ],
        };
        let mut sink = FakeSink::default();
        let model = build_model(&scene, &mut sink).unwrap();

        assert_eq!(sink.textures, vec!["plane.png".to_string()]);
        assert_eq!(sink.meshes.len(), 2);
        assert_eq!(sink.meshes[0].1, sink.meshes[1].1);
        assert_eq!(sink.models.len(), 1);
        assert_eq!(sink.models.get(model).unwrap().mesh_count(), 2);
    }

    #[test]
    fn untextured_materials_use_the_sentinel() {
        let scene = ImportedScene {
            meshes: vec![triangle("a", None), triangle("b", Some(0))],
            materials: vec![material(None)],
        };
        let mut sink = FakeSink::default();
        build_model(&scene, &mut sink).unwrap();

        assert!(sink.textures.is_empty());
        assert!(sink.meshes.iter().all(|(_, t)| *t == SENTINEL_TEXTURE));
    }

    #[test]
    fn out_of_range_material_uses_the_sentinel() {
        let scene = ImportedScene {
            meshes: vec![triangle("a", Some(9))],
            materials: vec![],
        };
        let mut sink = FakeSink::default();
        build_model(&scene, &mut sink).unwrap();
        assert_eq!(sink.meshes[0].1, SENTINEL_TEXTURE);
    }

    #[test]
    fn empty_meshes_are_skipped() {
        let mut empty = triangle("empty", None);
        empty.indices.clear();
        let scene = ImportedScene {
            meshes: vec![empty, triangle("solid", None)],
            materials: vec![],
        };
        let mut sink = FakeSink::default();
        let model = build_model(&scene, &mut sink).unwrap();
        assert_eq!(sink.models.get(model).unwrap().mesh_count(), 1);
    }

    #[test]
    fn texture_failure_aborts_the_load() {
        let scene = ImportedScene {
            meshes: vec![triangle("a", Some(0))],
            materials: vec![material(Some("gone.png"))],
        };
        let mut sink = FakeSink {
            fail_texture: Some("gone.png"),
            ..Default::default()
        };
        let err = build_model(&scene, &mut sink).unwrap_err();
        assert!(err.to_string().contains("gone.png"));
        assert!(sink.models.is_empty());
    }

    #[test]
    fn vertex_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<Vertex>(), 32);
    }

    #[test]
    fn obj_import_flips_v_and_whitens_color() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quad.obj");
        std::fs::write(
            &path,
            "o quad\n\
             v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\n\
             vt 0 0\nvt 1 0\nvt 1 1\nvt 0 1\n\
             f 1/1 2/2 3/3 4/4\n",
        )
        .unwrap();

        let scene = load_obj(&path).unwrap();
        assert_eq!(scene.meshes.len(), 1);
        let mesh = &scene.meshes[0];
        assert_eq!(mesh.indices.len(), 6);
        assert_eq!(mesh.vertices.len(), 4);
        assert!(mesh.vertices.iter().all(|v| v.col == Vec3::ONE));
        let origin = mesh
            .vertices
            .iter()
            .find(|v| v.pos == Vec3::ZERO)
            .unwrap();
        assert_eq!(origin.tex, Vec2::new(0.0, 1.0));
        assert!(mesh.material.is_none());
    }

    #[test]
    fn missing_obj_is_an_asset_error() {
        let err = load_obj(Path::new("Models/nothing.obj")).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Asset);
    }
}
