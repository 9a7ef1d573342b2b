//! Vertex formats and their input descriptions.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::pipeline::VertexInputLayout;

/// Position + color vertex.
///
/// - location 0: position (vec3, offset 0)
/// - location 1: color (vec3, offset 12)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct TriangleVertex {
    pub position: Vec3,
    pub color: Vec3,
}

impl TriangleVertex {
    #[inline]
    pub const fn new(position: Vec3, color: Vec3) -> Self {
        Self { position, color }
    }

    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 2] {
        [
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: std::mem::offset_of!(Self, position) as u32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 1,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: std::mem::offset_of!(Self, color) as u32,
            },
        ]
    }

    /// Bindings and attributes for pipeline creation.
    pub fn input_layout() -> VertexInputLayout {
        VertexInputLayout {
            bindings: vec![Self::binding_description()],
            attributes: Self::attribute_descriptions().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_triangle_vertex_size() {
        assert_eq!(std::mem::size_of::<TriangleVertex>(), 24);
    }

    #[test]
    fn test_triangle_vertex_attributes() {
        let [position, color] = TriangleVertex::attribute_descriptions();
        assert_eq!(position.location, 0);
        assert_eq!(position.offset, 0);
        assert_eq!(color.location, 1);
        assert_eq!(color.offset, 12);
        assert_eq!(color.format, vk::Format::R32G32B32_SFLOAT);
    }

    #[test]
    fn test_input_layout() {
        let layout = TriangleVertex::input_layout();
        assert_eq!(layout.bindings.len(), 1);
        assert_eq!(layout.bindings[0].stride, 24);
        assert_eq!(layout.attributes.len(), 2);
    }

    #[test]
    fn test_bytemuck_cast() {
        let vertices = [
            TriangleVertex::new(Vec3::new(0.0, -0.5, 0.0), Vec3::X),
            TriangleVertex::new(Vec3::new(0.5, 0.5, 0.0), Vec3::Y),
        ];
        let bytes: &[u8] = bytemuck::cast_slice(&vertices);
        assert_eq!(bytes.len(), 48);
    }
}
