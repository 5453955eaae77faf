//! MP4 output through FFmpeg.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg::util::format::pixel::Pixel;
use ffmpeg::Rational;
use image::RgbImage;
use std::path::Path;

pub(super) struct FfmpegVideoWriter {
    output: ffmpeg::format::context::Output,
    encoder: ffmpeg::encoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    stream_index: usize,
    encoder_time_base: Rational,
    width: u32,
    height: u32,
    next_pts: i64,
}

impl FfmpegVideoWriter {
    pub(super) fn open(path: &Path, codec_name: &str, fps: f64, width: u32, height: u32) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let mut output = ffmpeg::format::output(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        let codec = ffmpeg::encoder::find_by_name(codec_name)
            .ok_or_else(|| anyhow!("ffmpeg has no encoder named '{}'", codec_name))?;
        let global_header = output
            .format()
            .flags()
            .contains(ffmpeg::format::Flags::GLOBAL_HEADER);

        let frame_rate = Rational::from(fps);
        let encoder_time_base = frame_rate.invert();
        let mut context = ffmpeg::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .context("create ffmpeg video encoder")?;
        context.set_width(width);
        context.set_height(height);
        context.set_format(Pixel::YUV420P);
        context.set_frame_rate(Some(frame_rate));
        context.set_time_base(encoder_time_base);
        if global_header {
            context.set_flags(ffmpeg::codec::Flags::GLOBAL_HEADER);
        }
        let encoder = context
            .open_as(codec)
            .with_context(|| format!("open '{}' encoder", codec_name))?;

        let stream_index = {
            let mut stream = output.add_stream(codec).context("add video stream")?;
            stream.set_time_base(encoder_time_base);
            stream.set_parameters(&encoder);
            stream.index()
        };
        output.write_header().context("write container header")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            Pixel::RGB24,
            width,
            height,
            Pixel::YUV420P,
            width,
            height,
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        Ok(Self {
            output,
            encoder,
            scaler,
            stream_index,
            encoder_time_base,
            width,
            height,
            next_pts: 0,
        })
    }

    pub(super) fn write(&mut self, image: &RgbImage) -> Result<()> {
        let mut rgb_frame = ffmpeg::frame::Video::new(Pixel::RGB24, self.width, self.height);
        let row_bytes = self.width as usize * 3;
        let stride = rgb_frame.stride(0);
        let data = rgb_frame.data_mut(0);
        for (row, src) in image.as_raw().chunks_exact(row_bytes).enumerate() {
            let start = row * stride;
            data.get_mut(start..start + row_bytes)
                .context("ffmpeg frame row is out of bounds")?
                .copy_from_slice(src);
        }

        let mut yuv_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&rgb_frame, &mut yuv_frame)
            .context("convert frame to YUV")?;
        yuv_frame.set_pts(Some(self.next_pts));
        self.next_pts += 1;

        self.encoder
            .send_frame(&yuv_frame)
            .context("send frame to encoder")?;
        self.write_packets()
    }

    pub(super) fn finish(mut self) -> Result<()> {
        self.encoder.send_eof().context("flush encoder")?;
        self.write_packets()?;
        self.output
            .write_trailer()
            .context("write container trailer")?;
        Ok(())
    }

    fn write_packets(&mut self) -> Result<()> {
        let stream_time_base = self
            .output
            .stream(self.stream_index)
            .map(|stream| stream.time_base())
            .ok_or_else(|| anyhow!("output stream disappeared"))?;
        let mut packet = ffmpeg::Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream_index);
            packet.rescale_ts(self.encoder_time_base, stream_time_base);
            packet
                .write_interleaved(&mut self.output)
                .context("write video packet")?;
        }
        Ok(())
    }
}
