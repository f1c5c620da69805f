// Resource registry - append-only tables of GPU resources
//
// Meshes, textures and models are added at load time and live until the
// renderer shuts down. Consumers only ever see typed integer handles.

use crate::backend::buffer::DeviceBuffer;
use crate::backend::image::DeviceImage;
use crate::error::{RenderError, RenderResult};
use crate::model::Model;
use ash::vk;
use glam::Mat4;
use std::fmt;
use std::marker::PhantomData;

/// Stable index into a `ResourceTable<T>`.
pub struct Handle<T> {
    index: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    pub const fn new(index: u32) -> Self {
        Self {
            index,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn index(self) -> usize {
        self.index as usize
    }
}

// Manual impls: derives would demand the same traits of T
impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Handle<T> {}

impl<T> std::hash::Hash for Handle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = std::any::type_name::<T>().rsplit("::").next().unwrap_or("?");
        write!(f, "Handle<{}>({})", name, self.index)
    }
}

pub type MeshHandle = Handle<Mesh>;
pub type TextureHandle = Handle<Texture>;
pub type ModelHandle = Handle<Model>;

/// Slot 0 of the texture table: used by meshes whose material has no texture.
pub const SENTINEL_TEXTURE: TextureHandle = Handle::new(0);

/// Append-only storage. There is no removal; everything is released on drop.
pub struct ResourceTable<T> {
    items: Vec<T>,
}

impl<T> Default for ResourceTable<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T> ResourceTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: T) -> Handle<T> {
        let handle = Handle::new(self.items.len() as u32);
        self.items.push(item);
        handle
    }

    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        self.items.get(handle.index())
    }

    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        self.items.get_mut(handle.index())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

/// Immutable vertex/index pair with its fine transform and texture.
pub struct Mesh {
    pub vertex_buffer: DeviceBuffer,
    pub index_buffer: DeviceBuffer,
    pub vertex_count: u32,
    pub index_count: u32,
    pub texture: TextureHandle,
    pub transform: Mat4,
}

/// Sampled image plus the descriptor set that binds it.
pub struct Texture {
    pub image: DeviceImage,
    pub descriptor_set: vk::DescriptorSet,
}

#[derive(Default)]
pub struct ResourceRegistry {
    // Models reference meshes reference textures; drop in that order
    pub models: ResourceTable<Model>,
    pub meshes: ResourceTable<Mesh>,
    pub textures: ResourceTable<Texture>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model(&self, handle: ModelHandle) -> RenderResult<&Model> {
        self.models
            .get(handle)
            .ok_or_else(|| RenderError::InvalidHandle(format!("{:?}", handle)))
    }

    pub fn model_mut(&mut self, handle: ModelHandle) -> RenderResult<&mut Model> {
        self.models
            .get_mut(handle)
            .ok_or_else(|| RenderError::InvalidHandle(format!("{:?}", handle)))
    }

    pub fn mesh(&self, handle: MeshHandle) -> RenderResult<&Mesh> {
        self.meshes
            .get(handle)
            .ok_or_else(|| RenderError::InvalidHandle(format!("{:?}", handle)))
    }

    pub fn mesh_mut(&mut self, handle: MeshHandle) -> RenderResult<&mut Mesh> {
        self.meshes
            .get_mut(handle)
            .ok_or_else(|| RenderError::InvalidHandle(format!("{:?}", handle)))
    }

    /// Texture for a mesh, falling back to the sentinel for dangling handles.
    pub fn texture_or_sentinel(&self, handle: TextureHandle) -> Option<&Texture> {
        self.textures
            .get(handle)
            .or_else(|| self.textures.get(SENTINEL_TEXTURE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_sequential_and_stable() {
        let mut table = ResourceTable::new();
        let a = table.push("a");
        let b = table.push("b");
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        table.push("c");
        assert_eq!(table.get(a), Some(&"a"));
        assert_eq!(table.get(b), Some(&"b"));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn unknown_handle_is_none() {
        let table: ResourceTable<u8> = ResourceTable::new();
        assert!(table.get(Handle::new(5)).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn get_mut_edits_in_place() {
        let mut table = ResourceTable::new();
        let h = table.push(1);
        *table.get_mut(h).unwrap() = 7;
        assert_eq!(table.get(h), Some(&7));
    }

    #[test]
    fn handle_debug_names_the_type() {
        let h: Handle<Model> = Handle::new(3);
        assert_eq!(format!("{:?}", h), "Handle<Model>(3)");
    }

    #[test]
    fn invalid_model_handle_is_an_error() {
        let registry = ResourceRegistry::new();
        let err = registry.model(Handle::new(0)).err().unwrap();
        assert!(matches!(err, RenderError::InvalidHandle(_)));
    }

    #[test]
    fn sentinel_is_slot_zero() {
        assert_eq!(SENTINEL_TEXTURE.index(), 0);
    }
}
