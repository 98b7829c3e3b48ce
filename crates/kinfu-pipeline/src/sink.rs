//! Frame sinks — the runtime strategy behind interactive vs. headless runs.
//!
//! The controller picks one sink at startup from configuration.  The driver
//! itself never knows which is active: it only honors the sink's
//! `wants_render` answer and hands the buffers over after each call.

use kinfu_core::error::Result;
use kinfu_core::types::{FrameBuffers, Resolution};

/// Consumes rendered frames after each driver invocation.
pub trait FrameSink {
    /// Whether render images should be produced each frame.
    fn wants_render(&self) -> bool;

    /// Present the current buffers.  Returns `false` when the user closed
    /// the display — the controller treats that as normal loop termination.
    fn present(
        &mut self,
        buffers: &FrameBuffers,
        computation_size: Resolution,
        input_size: Resolution,
    ) -> Result<bool>;
}

/// Sink for headless runs: requests no rendering, presents nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeadlessSink;

impl FrameSink for HeadlessSink {
    fn wants_render(&self) -> bool {
        false
    }

    fn present(
        &mut self,
        _buffers: &FrameBuffers,
        _computation_size: Resolution,
        _input_size: Resolution,
    ) -> Result<bool> {
        Ok(true)
    }
}

#[cfg(feature = "gui")]
pub use window::WindowSink;

#[cfg(feature = "gui")]
mod window {
    use minifb::{Key, Window, WindowOptions};

    use kinfu_core::error::{PipelineError, Result};
    use kinfu_core::types::{FrameBuffers, Resolution, Rgb8};

    use super::FrameSink;

    /// Interactive sink: one window with the color input and the three
    /// render images in a 2×2 grid.
    pub struct WindowSink {
        window: Window,
        canvas: Vec<u32>,
        pane: Resolution,
    }

    impl WindowSink {
        /// Open the display for panes of the given input resolution.
        pub fn new(input_size: Resolution) -> Result<Self> {
            let width = (input_size.width * 2) as usize;
            let height = (input_size.height * 2) as usize;
            let window = Window::new(
                "kinfu",
                width,
                height,
                WindowOptions::default(),
            )
            .map_err(|e| PipelineError::Display(e.to_string()))?;
            Ok(Self {
                window,
                canvas: vec![0; width * height],
                pane: input_size,
            })
        }

        fn blit(&mut self, src: &[Rgb8], size: Resolution, pane_x: u32, pane_y: u32) {
            let canvas_w = (self.pane.width * 2) as usize;
            let ox = (pane_x * self.pane.width) as usize;
            let oy = (pane_y * self.pane.height) as usize;
            for y in 0..size.height.min(self.pane.height) as usize {
                for x in 0..size.width.min(self.pane.width) as usize {
                    let p = src[y * size.width as usize + x];
                    self.canvas[(oy + y) * canvas_w + ox + x] =
                        (u32::from(p.r) << 16) | (u32::from(p.g) << 8) | u32::from(p.b);
                }
            }
        }
    }

    impl FrameSink for WindowSink {
        fn wants_render(&self) -> bool {
            true
        }

        fn present(
            &mut self,
            buffers: &FrameBuffers,
            computation_size: Resolution,
            input_size: Resolution,
        ) -> Result<bool> {
            self.blit(&buffers.input_rgb, input_size, 0, 0);
            self.blit(&buffers.depth_render, computation_size, 1, 0);
            self.blit(&buffers.track_render, computation_size, 0, 1);
            self.blit(&buffers.volume_render, computation_size, 1, 1);

            let width = (self.pane.width * 2) as usize;
            let height = (self.pane.height * 2) as usize;
            self.window
                .update_with_buffer(&self.canvas, width, height)
                .map_err(|e| PipelineError::Display(e.to_string()))?;

            Ok(self.window.is_open() && !self.window.is_key_down(Key::Escape))
        }
    }
}
