//! C mozjpeg codec layer.
//!
//! [`decode`] and [`encode`] wrap `mozjpeg-sys` so that nothing libjpeg does
//! can take the process down:
//!
//! - The error manager's `error_exit` unwinds instead of calling `exit()`, and
//!   every libjpeg call runs inside [`std::panic::catch_unwind`]. A caught
//!   unwind becomes [`Error::Codec`] with libjpeg's message code.
//! - libjpeg objects live in boxed RAII wrappers whose `Drop` calls
//!   `jpeg_destroy_*`, so early returns and unwinds both release them.
//! - Compressed output goes through a destination manager backed by a Rust
//!   `Vec<u8>`; no C-allocated buffer is ever handed back.
//!
//! # Example
//!
//! ```no_run
//! use jpeg_archive::codec::{decode, encode, EncodeSettings};
//! use jpeg_archive::PixelLayout;
//!
//! # fn main() -> Result<(), jpeg_archive::Error> {
//! # let original: Vec<u8> = vec![];
//! let image = decode(&original, PixelLayout::Rgb)?;
//! let smaller = encode(&image, &EncodeSettings::new(70))?;
//! # Ok(())
//! # }
//! ```

#![allow(unsafe_code)]

use std::ffi::{c_int, c_ulong};
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};

use mozjpeg_sys::{
    boolean, jpeg_CreateCompress, jpeg_CreateDecompress, jpeg_c_set_bool_param,
    jpeg_c_set_int_param, jpeg_common_struct, jpeg_compress_struct, jpeg_decompress_struct,
    jpeg_destination_mgr, jpeg_destroy_compress, jpeg_destroy_decompress, jpeg_error_mgr,
    jpeg_finish_compress, jpeg_finish_decompress, jpeg_mem_src, jpeg_read_header,
    jpeg_read_scanlines, jpeg_set_defaults, jpeg_set_quality, jpeg_simple_progression,
    jpeg_start_compress, jpeg_start_decompress, jpeg_std_error, jpeg_write_scanlines,
    J_BOOLEAN_PARAM, J_COLOR_SPACE, J_INT_PARAM, JPEG_LIB_VERSION,
};

use crate::error::{CodecStage, Error, Result};
use crate::marker::{has_jpeg_magic, JfifHeader};
use crate::types::{ColorSpace, PixelLayout, RasterImage, SubsamplingMode};

/// `JINT_COMPRESS_PROFILE` value selecting libjpeg-turbo compatible speed.
const JCP_FASTEST: c_int = 0x2AEA5CB4;

/// Size of each chunk handed to libjpeg by the output destination.
const OUTPUT_CHUNK: usize = 64 * 1024;

// =============================================================================
// Error containment
// =============================================================================

/// Unwind payload raised by `error_exit`.
struct CodecFailure {
    code: c_int,
}

/// Unwind payload raised when the output buffer cannot grow.
struct OutputAllocationFailure;

/// Runs `f`, converting libjpeg's unwinding errors into [`Error`] values.
///
/// Panics that did not originate in libjpeg are re-raised untouched.
fn contain<T>(stage: CodecStage, f: impl FnOnce() -> Result<T>) -> Result<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let payload = match payload.downcast::<CodecFailure>() {
                Ok(failure) => {
                    tracing::warn!("libjpeg {} failed: message code {}", stage, failure.code);
                    return Err(Error::Codec {
                        stage,
                        code: failure.code,
                    });
                }
                Err(other) => other,
            };
            if payload.is::<OutputAllocationFailure>() {
                tracing::warn!("libjpeg {}: output buffer allocation failed", stage);
                return Err(Error::AllocationFailed);
            }
            resume_unwind(payload)
        }
    }
}

/// Error manager whose fatal path unwinds and whose messages go to `tracing`.
fn new_error_mgr() -> Box<jpeg_error_mgr> {
    // Safety: jpeg_std_error fills in every field of the zeroed struct.
    unsafe {
        let mut err: Box<jpeg_error_mgr> = Box::new(std::mem::zeroed());
        jpeg_std_error(&mut err);
        err.error_exit = Some(unwind_error_exit);
        err.emit_message = Some(trace_message);
        err
    }
}

#[cold]
extern "C-unwind" fn unwind_error_exit(cinfo: &mut jpeg_common_struct) {
    // Safety: libjpeg only calls this with `err` pointing at our manager.
    let code = unsafe { (*cinfo.err).msg_code };
    resume_unwind(Box::new(CodecFailure { code }));
}

extern "C-unwind" fn trace_message(cinfo: &mut jpeg_common_struct, msg_level: c_int) {
    // Safety: as above.
    let err = unsafe { &mut *cinfo.err };
    if msg_level < 0 {
        err.num_warnings += 1;
        tracing::trace!("libjpeg warning: message code {}", err.msg_code);
    } else if msg_level <= err.trace_level {
        tracing::trace!("libjpeg trace {}: message code {}", msg_level, err.msg_code);
    }
}

// =============================================================================
// Decoding
// =============================================================================

struct Decompressor {
    cinfo: Box<jpeg_decompress_struct>,
    _err: Box<jpeg_error_mgr>,
}

impl Decompressor {
    fn new() -> Self {
        let mut err = new_error_mgr();
        // Safety: jpeg_CreateDecompress expects zeroed memory.
        let mut cinfo: Box<jpeg_decompress_struct> = Box::new(unsafe { std::mem::zeroed() });
        cinfo.common.err = &mut *err;
        let mut out = Self { cinfo, _err: err };
        // Safety: `err` is installed and outlives `cinfo`.
        unsafe {
            jpeg_CreateDecompress(
                &mut *out.cinfo,
                JPEG_LIB_VERSION as i32,
                std::mem::size_of::<jpeg_decompress_struct>(),
            );
        }
        out
    }
}

impl Drop for Decompressor {
    fn drop(&mut self) {
        // Safety: a zeroed struct (creation never ran) has a null memory
        // manager, which jpeg_destroy treats as a no-op.
        unsafe { jpeg_destroy_decompress(&mut *self.cinfo) }
    }
}

fn color_space_of(space: J_COLOR_SPACE) -> ColorSpace {
    match space {
        J_COLOR_SPACE::JCS_GRAYSCALE => ColorSpace::Grayscale,
        J_COLOR_SPACE::JCS_RGB => ColorSpace::Rgb,
        J_COLOR_SPACE::JCS_YCbCr => ColorSpace::YCbCr,
        J_COLOR_SPACE::JCS_CMYK => ColorSpace::Cmyk,
        J_COLOR_SPACE::JCS_YCCK => ColorSpace::Ycck,
        _ => ColorSpace::Unknown,
    }
}

/// Decodes a JPEG into an RGB or grayscale raster.
///
/// # Errors
///
/// - [`Error::NotJpeg`] if the SOI magic is missing
/// - [`Error::UnsupportedColorSpace`] for CMYK/YCCK (or unknown) sources
/// - [`Error::Codec`] if libjpeg rejects the stream
/// - [`Error::AllocationFailed`] if the pixel buffer cannot be reserved
pub fn decode(data: &[u8], layout: PixelLayout) -> Result<RasterImage> {
    if data.is_empty() {
        return Err(Error::EmptyInput);
    }
    if !has_jpeg_magic(data) {
        return Err(Error::NotJpeg);
    }
    contain(CodecStage::Decode, || decode_contained(data, layout))
}

fn decode_contained(data: &[u8], layout: PixelLayout) -> Result<RasterImage> {
    let mut dec = Decompressor::new();
    let cinfo = &mut *dec.cinfo;

    // Safety: `data` outlives the decompressor; every call below may unwind
    // through `unwind_error_exit`, which `contain` catches.
    unsafe {
        jpeg_mem_src(cinfo, data.as_ptr(), data.len() as c_ulong);
        if jpeg_read_header(cinfo, 1) != 1 {
            return Err(Error::Internal("JPEG header incomplete"));
        }

        let source = color_space_of(cinfo.jpeg_color_space);
        if !source.is_convertible() {
            return Err(Error::UnsupportedColorSpace {
                source_space: source,
                target: layout.color_space(),
            });
        }

        cinfo.out_color_space = match layout {
            PixelLayout::Rgb => J_COLOR_SPACE::JCS_RGB,
            PixelLayout::Gray => J_COLOR_SPACE::JCS_GRAYSCALE,
        };
        jpeg_start_decompress(cinfo);

        let width = cinfo.output_width as usize;
        let height = cinfo.output_height as usize;
        if cinfo.output_components as usize != layout.channels() {
            return Err(Error::Internal("decoder produced unexpected component count"));
        }

        let row_stride = width * layout.channels();
        let total = row_stride
            .checked_mul(height)
            .ok_or(Error::InvalidDimensions { width, height })?;
        let mut pixels = Vec::new();
        pixels.try_reserve_exact(total)?;
        pixels.resize(total, 0);

        let mut row_pointer: [*mut u8; 1] = [std::ptr::null_mut()];
        while cinfo.output_scanline < cinfo.output_height {
            let offset = cinfo.output_scanline as usize * row_stride;
            row_pointer[0] = pixels.as_mut_ptr().add(offset);
            if jpeg_read_scanlines(cinfo, row_pointer.as_mut_ptr(), 1) == 0 {
                return Err(Error::Internal("decoder made no progress"));
            }
        }
        jpeg_finish_decompress(cinfo);

        tracing::trace!(
            "decoded {}x{} {:?} from {} bytes ({:?} source)",
            width,
            height,
            layout,
            data.len(),
            source
        );
        RasterImage::new(pixels, width, height, layout)
    }
}

// =============================================================================
// Encoding
// =============================================================================

/// Parameters for one encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeSettings {
    /// Quality 1-100
    pub quality: u8,
    /// Progressive scan ordering
    pub progressive: bool,
    /// Full mozjpeg optimization (trellis, scan optimization); off selects
    /// the fastest profile
    pub optimize: bool,
    /// Chroma subsampling for 3-channel output
    pub subsampling: SubsamplingMode,
    /// JFIF version and density written to APP0; libjpeg defaults if `None`
    pub jfif: Option<JfifHeader>,
}

impl EncodeSettings {
    /// Progressive, fully optimized 4:2:0 at `quality`.
    pub fn new(quality: u8) -> Self {
        Self {
            quality,
            progressive: true,
            optimize: true,
            subsampling: SubsamplingMode::Default420,
            jfif: None,
        }
    }

    /// Sets progressive scan ordering.
    pub fn progressive(mut self, enable: bool) -> Self {
        self.progressive = enable;
        self
    }

    /// Sets full optimization.
    pub fn optimize(mut self, enable: bool) -> Self {
        self.optimize = enable;
        self
    }

    /// Sets chroma subsampling.
    pub fn subsampling(mut self, mode: SubsamplingMode) -> Self {
        self.subsampling = mode;
        self
    }

    /// Sets the JFIF fields of the emitted APP0.
    pub fn jfif(mut self, header: Option<JfifHeader>) -> Self {
        self.jfif = header;
        self
    }
}

/// Destination manager appending to a `Vec<u8>`.
///
/// `iface` must stay the first field: libjpeg hands back a pointer to it and
/// the callbacks cast that pointer to the whole struct.
#[repr(C)]
struct VecDestination {
    iface: jpeg_destination_mgr,
    chunk: Vec<u8>,
    out: Vec<u8>,
}

impl VecDestination {
    fn new() -> Box<Self> {
        Box::new(Self {
            iface: jpeg_destination_mgr {
                next_output_byte: std::ptr::null_mut(),
                free_in_buffer: 0,
                init_destination: Some(init_destination),
                empty_output_buffer: Some(empty_output_buffer),
                term_destination: Some(term_destination),
            },
            chunk: vec![0; OUTPUT_CHUNK],
            out: Vec::new(),
        })
    }

    fn flush(&mut self, used: usize) {
        if self.out.try_reserve(used).is_err() {
            resume_unwind(Box::new(OutputAllocationFailure));
        }
        self.out.extend_from_slice(&self.chunk[..used]);
        self.iface.next_output_byte = self.chunk.as_mut_ptr();
        self.iface.free_in_buffer = self.chunk.len();
    }
}

/// # Safety
/// `cinfo.dest` must point at the `iface` field of a live `VecDestination`.
unsafe fn destination(cinfo: &mut jpeg_compress_struct) -> &mut VecDestination {
    &mut *cinfo.dest.cast::<VecDestination>()
}

unsafe extern "C-unwind" fn init_destination(cinfo: &mut jpeg_compress_struct) {
    let dest = destination(cinfo);
    dest.iface.next_output_byte = dest.chunk.as_mut_ptr();
    dest.iface.free_in_buffer = dest.chunk.len();
}

unsafe extern "C-unwind" fn empty_output_buffer(cinfo: &mut jpeg_compress_struct) -> boolean {
    // libjpeg always hands over the whole chunk here, regardless of
    // free_in_buffer.
    let dest = destination(cinfo);
    let len = dest.chunk.len();
    dest.flush(len);
    1
}

unsafe extern "C-unwind" fn term_destination(cinfo: &mut jpeg_compress_struct) {
    let dest = destination(cinfo);
    let used = dest.chunk.len() - dest.iface.free_in_buffer;
    dest.flush(used);
}

struct Compressor {
    cinfo: Box<jpeg_compress_struct>,
    _err: Box<jpeg_error_mgr>,
    dest: Box<VecDestination>,
}

impl Compressor {
    fn new() -> Self {
        let mut err = new_error_mgr();
        // Safety: jpeg_CreateCompress expects zeroed memory.
        let mut cinfo: Box<jpeg_compress_struct> = Box::new(unsafe { std::mem::zeroed() });
        cinfo.common.err = &mut *err;
        let mut out = Self {
            cinfo,
            _err: err,
            dest: VecDestination::new(),
        };
        // Safety: `err` is installed and outlives `cinfo`.
        unsafe {
            jpeg_CreateCompress(
                &mut *out.cinfo,
                JPEG_LIB_VERSION as i32,
                std::mem::size_of::<jpeg_compress_struct>(),
            );
        }
        out.cinfo.dest = &mut out.dest.iface;
        out
    }
}

impl Drop for Compressor {
    fn drop(&mut self) {
        // Safety: see Decompressor::drop.
        unsafe { jpeg_destroy_compress(&mut *self.cinfo) }
    }
}

/// Encodes a raster with C mozjpeg.
///
/// The settings map onto libjpeg as follows:
///
/// | optimize | progressive | effect |
/// |----------|-------------|--------|
/// | false | false | fastest profile, no trellis, baseline |
/// | false | true | fastest profile, no trellis, simple progression |
/// | true | false | mozjpeg defaults with a single baseline scan |
/// | true | true | mozjpeg defaults (optimized progressive scans) |
///
/// Subsampling is only applied to 3-channel YCbCr output.
pub fn encode(image: &RasterImage, settings: &EncodeSettings) -> Result<Vec<u8>> {
    if !(1..=100).contains(&settings.quality) {
        return Err(Error::InvalidQuality(settings.quality));
    }
    let (Ok(width), Ok(height)) = (u32::try_from(image.width()), u32::try_from(image.height()))
    else {
        return Err(Error::InvalidDimensions {
            width: image.width(),
            height: image.height(),
        });
    };
    contain(CodecStage::Encode, || {
        encode_contained(image, width, height, settings)
    })
}

fn encode_contained(
    image: &RasterImage,
    width: u32,
    height: u32,
    settings: &EncodeSettings,
) -> Result<Vec<u8>> {
    let mut comp = Compressor::new();
    let cinfo = &mut *comp.cinfo;

    // Safety: the raster outlives the compressor; every call below may unwind
    // through `unwind_error_exit`, which `contain` catches.
    unsafe {
        // The profile must be chosen before jpeg_set_defaults
        if !settings.optimize {
            jpeg_c_set_int_param(cinfo, J_INT_PARAM::JINT_COMPRESS_PROFILE, JCP_FASTEST);
        }

        cinfo.image_width = width;
        cinfo.image_height = height;
        match image.layout() {
            PixelLayout::Rgb => {
                cinfo.input_components = 3;
                cinfo.in_color_space = J_COLOR_SPACE::JCS_RGB;
            }
            PixelLayout::Gray => {
                cinfo.input_components = 1;
                cinfo.in_color_space = J_COLOR_SPACE::JCS_GRAYSCALE;
            }
        }

        jpeg_set_defaults(cinfo);

        if !settings.optimize {
            jpeg_c_set_bool_param(cinfo, J_BOOLEAN_PARAM::JBOOLEAN_TRELLIS_QUANT, 0);
        }
        if settings.optimize && !settings.progressive {
            cinfo.scan_info = std::ptr::null();
            cinfo.num_scans = 0;
            jpeg_c_set_bool_param(cinfo, J_BOOLEAN_PARAM::JBOOLEAN_OPTIMIZE_SCANS, 0);
        }
        if !settings.optimize && settings.progressive {
            jpeg_simple_progression(cinfo);
        }

        if matches!(cinfo.jpeg_color_space, J_COLOR_SPACE::JCS_YCbCr) && cinfo.num_components == 3
        {
            if let Some((h, v)) = settings.subsampling.luma_factors() {
                (*cinfo.comp_info.offset(0)).h_samp_factor = h;
                (*cinfo.comp_info.offset(0)).v_samp_factor = v;
                for i in 1..3 {
                    (*cinfo.comp_info.offset(i)).h_samp_factor = 1;
                    (*cinfo.comp_info.offset(i)).v_samp_factor = 1;
                }
            }
        }

        // Only JFIF colorspaces write the header at all
        if let Some(jfif) = settings.jfif {
            if cinfo.write_JFIF_header != 0 {
                (cinfo.JFIF_major_version, cinfo.JFIF_minor_version) = jfif.version;
                cinfo.density_unit = jfif.density_unit;
                cinfo.X_density = jfif.x_density;
                cinfo.Y_density = jfif.y_density;
            }
        }

        jpeg_set_quality(cinfo, settings.quality as c_int, 1);
        jpeg_start_compress(cinfo, 1);

        let row_stride = image.stride();
        let pixels = image.pixels();
        let mut row_pointer: [*const u8; 1] = [std::ptr::null()];
        while cinfo.next_scanline < cinfo.image_height {
            let offset = cinfo.next_scanline as usize * row_stride;
            row_pointer[0] = pixels.as_ptr().add(offset);
            if jpeg_write_scanlines(cinfo, row_pointer.as_ptr() as *mut *const u8, 1) == 0 {
                return Err(Error::Internal("encoder made no progress"));
            }
        }

        jpeg_finish_compress(cinfo);
    }

    let jpeg = std::mem::take(&mut comp.dest.out);
    tracing::trace!(
        "encoded {}x{} q{} progressive={} optimize={} {:?}: {} bytes",
        width,
        height,
        settings.quality,
        settings.progressive,
        settings.optimize,
        settings.subsampling,
        jpeg.len()
    );
    Ok(jpeg)
}
