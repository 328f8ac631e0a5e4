//! Compute pipeline execution
//!
//! Runs one request on the calling thread's context:
//! - Upload the source into the input texture
//! - Write the uniforms and dispatch 16x16 workgroups
//! - Copy the storage texture into a padded readback buffer
//! - Strip row padding on copy-out
//!
//! The token is checked before acquiring the target, before upload/dispatch,
//! and before readback. A cancelled request never maps the readback buffer.

use std::sync::Arc;

use tracing::{debug, warn};

use super::context::{lock, ThreadContext, TEXTURE_FORMAT};
use super::shaders::WORKGROUP_SIZE;
use super::uniforms::AdjustUniforms;
use crate::error::{RenderError, RenderStop};
use crate::render::cancel::CancellationToken;
use crate::state::data::PixelBuffer;
use crate::state::edit::AdjustmentParameters;

/// Bytes per texel for `Rgba32Float`
const BYTES_PER_PIXEL: u32 = 16;

/// Workgroups per axis covering an image of the given size
pub fn dispatch_size(width: u32, height: u32) -> (u32, u32) {
    (width.div_ceil(WORKGROUP_SIZE), height.div_ceil(WORKGROUP_SIZE))
}

/// Row pitch of the readback buffer, aligned for texture-to-buffer copies
pub fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * BYTES_PER_PIXEL;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// Input texture, output storage texture and readback buffer for one size
pub struct OffscreenTarget {
    pub(crate) width: u32,
    pub(crate) height: u32,
    input: wgpu::Texture,
    input_view: wgpu::TextureView,
    output: wgpu::Texture,
    output_view: wgpu::TextureView,
    readback: wgpu::Buffer,
    padded_bytes_per_row: u32,
}

impl OffscreenTarget {
    pub(crate) fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let size = extent(width, height);

        let input = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Source Texture"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        let output = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Rendered Texture"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });

        let padded_bytes_per_row = padded_bytes_per_row(width);
        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Buffer"),
            size: padded_bytes_per_row as u64 * height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        Self {
            width,
            height,
            input_view: input.create_view(&wgpu::TextureViewDescriptor::default()),
            output_view: output.create_view(&wgpu::TextureViewDescriptor::default()),
            input,
            output,
            readback,
            padded_bytes_per_row,
        }
    }

    pub(crate) fn matches(&self, width: u32, height: u32) -> bool {
        self.width == width && self.height == height
    }
}

fn extent(width: u32, height: u32) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    }
}

fn checkpoint(token: &CancellationToken) -> Result<(), RenderStop> {
    if token.is_cancelled() {
        Err(RenderStop::Cancelled)
    } else {
        Ok(())
    }
}

fn describe_gpu_error(err: &wgpu::Error) -> String {
    match err {
        wgpu::Error::OutOfMemory { .. } => "out of GPU memory".to_string(),
        other => other.to_string(),
    }
}

/// Render `image` with `params` on the given thread context
pub fn run(
    ctx: &mut ThreadContext,
    image: &PixelBuffer,
    params: &AdjustmentParameters,
    token: &CancellationToken,
) -> Result<PixelBuffer, RenderStop> {
    let (width, height) = image.dimensions();
    if image.is_empty() {
        return Err(RenderError::InputRejected("image is empty".to_string()).into());
    }
    if width > ctx.max_texture_dimension || height > ctx.max_texture_dimension {
        return Err(RenderError::InputRejected(format!(
            "{}x{} exceeds the device texture limit of {}",
            width, height, ctx.max_texture_dimension
        ))
        .into());
    }

    checkpoint(token)?;
    // Error scopes are a stack on the shared device. Target allocation runs
    // inside them so its failures land on this request.
    let scope_lock = Arc::clone(&ctx.scope_lock);
    let scope_guard = lock(&scope_lock);
    ctx.device.push_error_scope(wgpu::ErrorFilter::Validation);
    ctx.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);

    ctx.ensure_target(width, height);
    let submitted = encode_and_submit(ctx, image, params, token);
    let _ = ctx.device.poll(wgpu::Maintain::Wait);

    let out_of_memory = pollster::block_on(ctx.device.pop_error_scope());
    let validation = pollster::block_on(ctx.device.pop_error_scope());
    drop(scope_guard);
    if let Some(err) = out_of_memory.or(validation) {
        warn!("GPU error while rendering {}x{}: {}", width, height, err);
        // Never reuse a target that may be invalid
        ctx.target = None;
        return Err(RenderError::dispatch("dispatch", describe_gpu_error(&err)).into());
    }
    submitted?;

    checkpoint(token)?;
    let target = ctx
        .target
        .as_ref()
        .ok_or_else(|| RenderError::dispatch("target", "offscreen target missing"))?;
    let pixels = read_back(&ctx.device, target)?;
    debug!("GPU rendered {}x{}", width, height);
    PixelBuffer::from_rgba_f32(width, height, pixels).map_err(RenderStop::Failed)
}

/// Upload, dispatch and copy into the readback buffer in one submission.
/// Must run with the error scopes pushed.
fn encode_and_submit(
    ctx: &ThreadContext,
    image: &PixelBuffer,
    params: &AdjustmentParameters,
    token: &CancellationToken,
) -> Result<(), RenderStop> {
    let (width, height) = image.dimensions();
    let target = ctx
        .target
        .as_ref()
        .ok_or_else(|| RenderError::dispatch("target", "offscreen target missing"))?;

    checkpoint(token)?;
    let device = &ctx.device;
    let queue = &ctx.queue;

    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &target.input,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        bytemuck::cast_slice(image.as_slice()),
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(width * BYTES_PER_PIXEL),
            rows_per_image: Some(height),
        },
        extent(width, height),
    );

    let uniforms = AdjustUniforms::new(params, width, height);
    queue.write_buffer(&ctx.uniform_buffer, 0, bytemuck::cast_slice(&[uniforms]));

    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Adjust Bind Group"),
        layout: &ctx.program.bind_group_layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&target.input_view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::TextureView(&target.output_view),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: ctx.uniform_buffer.as_entire_binding(),
            },
        ],
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Adjust Encoder"),
    });
    {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Adjust Pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&ctx.program.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        let (groups_x, groups_y) = dispatch_size(width, height);
        pass.dispatch_workgroups(groups_x, groups_y, 1);
    }

    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture: &target.output,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &target.readback,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(target.padded_bytes_per_row),
                rows_per_image: Some(height),
            },
        },
        extent(width, height),
    );

    queue.submit(Some(encoder.finish()));
    Ok(())
}

/// Map the readback buffer and copy out the unpadded rows
fn read_back(device: &wgpu::Device, target: &OffscreenTarget) -> Result<Vec<f32>, RenderError> {
    let slice = target.readback.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    let _ = device.poll(wgpu::Maintain::Wait);

    rx.recv()
        .map_err(|e| RenderError::dispatch("readback", e))?
        .map_err(|e| RenderError::dispatch("readback", e))?;

    let row_bytes = (target.width * BYTES_PER_PIXEL) as usize;
    let mut output = Vec::with_capacity(target.width as usize * target.height as usize * 4);
    {
        let data = slice.get_mapped_range();
        for row in data.chunks_exact(target.padded_bytes_per_row as usize) {
            output.extend(
                row[..row_bytes]
                    .chunks_exact(4)
                    .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]])),
            );
        }
    }
    target.readback.unmap();
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::CpuRenderer;
    use crate::gpu::context::ContextRegistry;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_dispatch_size_rounds_up() {
        assert_eq!(dispatch_size(16, 16), (1, 1));
        assert_eq!(dispatch_size(17, 33), (2, 3));
        assert_eq!(dispatch_size(1, 1), (1, 1));
        assert_eq!(dispatch_size(4000, 3000), (250, 188));
    }

    #[test]
    fn test_padded_rows() {
        assert_eq!(padded_bytes_per_row(16), 256);
        assert_eq!(padded_bytes_per_row(17), 512);
        assert_eq!(padded_bytes_per_row(1), 256);
        assert_eq!(padded_bytes_per_row(64) % wgpu::COPY_BYTES_PER_ROW_ALIGNMENT, 0);
    }

    fn gpu_context() -> Option<(ContextRegistry, std::sync::Arc<std::sync::Mutex<ThreadContext>>)> {
        let registry = ContextRegistry::new();
        registry.initialize_primary_context().ok()?;
        let context = registry.context_for_current_thread().ok()?;
        Some((registry, context))
    }

    #[test]
    fn test_gpu_matches_cpu() {
        let Some((registry, context)) = gpu_context() else {
            return; // no GPU on this machine
        };

        let mut data = Vec::new();
        for y in 0..33u32 {
            for x in 0..17u32 {
                data.extend_from_slice(&[x as f32 / 17.0, y as f32 / 33.0, 0.5, 1.0]);
            }
        }
        let image = PixelBuffer::from_rgba_f32(17, 33, data).unwrap();
        let mut params = AdjustmentParameters::default();
        params.exposure = 0.5;
        params.saturation = 20.0;
        params.vignette_strength = 40.0;

        let token = CancellationToken::new();
        let gpu = run(&mut lock(&context), &image, &params, &token).unwrap();
        let cpu = CpuRenderer::new(1).unwrap().render(&image, &params, &token).unwrap();
        assert_eq!(gpu.dimensions(), (17, 33));
        for (a, b) in gpu.as_slice().iter().zip(cpu.as_slice()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-3);
        }

        // Same size reuses the target
        run(&mut lock(&context), &image, &params, &token).unwrap();
        assert_eq!(lock(&context).target_size(), Some((17, 33)));
        registry.teardown();
    }

    #[test]
    fn test_gpu_allocation_failure_is_reported() {
        let Some((registry, context)) = gpu_context() else {
            return;
        };
        let mut ctx = lock(&context);
        let limit = ctx.device.limits().max_texture_dimension_2d;
        // Let an oversized width through so texture creation itself fails
        ctx.max_texture_dimension = u32::MAX;
        let wide = PixelBuffer::solid(limit + 1, 1, [0.5, 0.5, 0.5, 1.0]);
        let token = CancellationToken::new();

        let result = run(&mut ctx, &wide, &AdjustmentParameters::default(), &token);
        assert!(matches!(result, Err(RenderStop::Failed(RenderError::Dispatch(_)))));
        assert_eq!(ctx.target_size(), None);

        // The context stays usable
        let image = PixelBuffer::solid(8, 8, [0.5, 0.5, 0.5, 1.0]);
        let result = run(&mut ctx, &image, &AdjustmentParameters::default(), &token);
        assert_eq!(result.map(|i| i.dimensions()), Ok((8, 8)));
        drop(ctx);
        registry.teardown();
    }

    #[test]
    fn test_gpu_cancelled_before_start() {
        let Some((registry, context)) = gpu_context() else {
            return;
        };
        let token = CancellationToken::new();
        token.cancel();
        let image = PixelBuffer::solid(8, 8, [0.5, 0.5, 0.5, 1.0]);
        let result = run(&mut lock(&context), &image, &AdjustmentParameters::default(), &token);
        assert_eq!(result, Err(RenderStop::Cancelled));
        assert_eq!(lock(&context).target_size(), None);
        registry.teardown();
    }
}
