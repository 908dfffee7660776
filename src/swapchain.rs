//! Minimal coordinator that keeps a handful of shared images in flight.
//!
//! Images are recycled only once the compositor has finished with them,
//! and only when another image of the same size is still held, so that
//! the application never blocks on the image the compositor is reading.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error};

use crate::config::HandoffConfig;
use crate::device::ImageDevice;
use crate::error::HandoffResult;
use crate::image::{ImageState, PixelSize, SharedImage};
use crate::interop::{CompositionInterop, DrawingSurface};
use crate::present::PresentStatus;

pub struct HandoffSwapchain<D, C, S>
where
    D: ImageDevice,
    C: CompositionInterop,
    S: DrawingSurface<C::ImportedImage>,
{
    images: Vec<SharedImage<D, C, S>>,
    device: D,
    interop: Arc<C>,
    target: Arc<S>,
    config: HandoffConfig,
}

impl<D, C, S> HandoffSwapchain<D, C, S>
where
    D: ImageDevice,
    C: CompositionInterop,
    S: DrawingSurface<C::ImportedImage>,
{
    pub fn new(device: D, interop: Arc<C>, target: Arc<S>, config: HandoffConfig) -> Self {
        Self {
            images: Vec::new(),
            device,
            interop,
            target,
            config,
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn config(&self) -> &HandoffConfig {
        &self.config
    }

    /// Number of images currently held (idle or in flight).
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Picks or creates an image of `size` and acquires it for drawing.
    pub fn begin_draw(&mut self, size: PixelSize) -> HandoffResult<DrawSession<'_, D, C, S>> {
        let mut image = match self.take_reusable_image(size) {
            Some(image) => image,
            None => {
                debug!(%size, held = self.images.len(), "creating swapchain image");
                SharedImage::new(
                    &self.device,
                    size,
                    self.interop.clone(),
                    self.target.clone(),
                    self.config,
                )?
            }
        };
        image.begin_draw()?;
        Ok(DrawSession {
            swapchain: self,
            image: Some(image),
        })
    }

    /// Retires broken images and stale sizes, then removes and returns a
    /// ready image of `size` if at least one other same-size image stays
    /// behind, ready or still being read.
    fn take_reusable_image(&mut self, size: PixelSize) -> Option<SharedImage<D, C, S>> {
        let mut found: Option<usize> = None;
        let mut same_size_held = 0usize;

        for index in (0..self.images.len()).rev() {
            let image = &mut self.images[index];
            let status = image.present_status();
            let ready = matches!(status, None | Some(PresentStatus::Completed));
            let broken = matches!(status, Some(PresentStatus::Failed))
                || image.state() == ImageState::Faulted;
            let matches_size = image.size() == size;

            if broken || (!matches_size && ready) {
                debug!(
                    image_size = %image.size(),
                    requested = %size,
                    broken,
                    "retiring swapchain image"
                );
                let retired = self.images.remove(index);
                retired.dispose();
                // Indices above `index` shifted down by one.
                if let Some(found_index) = found.as_mut() {
                    *found_index -= 1;
                }
                continue;
            }

            if matches_size {
                same_size_held += 1;
                if ready && found.is_none() {
                    found = Some(index);
                }
            }
        }

        match found {
            Some(index) if same_size_held > 1 => Some(self.images.remove(index)),
            _ => None,
        }
    }

    /// Waits for every outstanding present and releases all images.
    pub fn dispose(mut self) {
        for image in self.images.drain(..) {
            image.dispose();
        }
    }
}

impl<D, C, S> fmt::Debug for HandoffSwapchain<D, C, S>
where
    D: ImageDevice,
    C: CompositionInterop,
    S: DrawingSurface<C::ImportedImage>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandoffSwapchain")
            .field("images", &self.images)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// An image acquired for drawing. Presenting returns it to the swapchain;
/// dropping an un-presented session presents it as well.
pub struct DrawSession<'a, D, C, S>
where
    D: ImageDevice,
    C: CompositionInterop,
    S: DrawingSurface<C::ImportedImage>,
{
    swapchain: &'a mut HandoffSwapchain<D, C, S>,
    image: Option<SharedImage<D, C, S>>,
}

impl<D, C, S> DrawSession<'_, D, C, S>
where
    D: ImageDevice,
    C: CompositionInterop,
    S: DrawingSurface<C::ImportedImage>,
{
    pub fn image(&self) -> Option<&SharedImage<D, C, S>> {
        self.image.as_ref()
    }

    pub fn render_target(&self) -> Option<&D::RenderTarget> {
        self.image.as_ref().map(SharedImage::render_target)
    }

    pub fn present(mut self) -> HandoffResult<()> {
        self.finish()
    }

    fn finish(&mut self) -> HandoffResult<()> {
        let Some(mut image) = self.image.take() else {
            return Ok(());
        };
        let result = image.present();
        // Faulted images go back too; the next begin_draw retires them.
        self.swapchain.images.push(image);
        result
    }
}

impl<D, C, S> Drop for DrawSession<'_, D, C, S>
where
    D: ImageDevice,
    C: CompositionInterop,
    S: DrawingSurface<C::ImportedImage>,
{
    fn drop(&mut self) {
        if let Err(err) = self.finish() {
            error!(error = %err, "implicit present on dropped draw session failed");
        }
    }
}

impl<D, C, S> fmt::Debug for DrawSession<'_, D, C, S>
where
    D: ImageDevice,
    C: CompositionInterop,
    S: DrawingSurface<C::ImportedImage>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DrawSession")
            .field("image", &self.image)
            .finish_non_exhaustive()
    }
}
