//! Pixel encoders
//!
//! One encoder per personality, turning a DMX frame into the chipset's wire
//! format. Each encoder computes the frame length it needs, checks a buffer
//! out of the backend, writes the bytes, and commits. A frame without enough
//! DMX data for even one pixel is skipped without committing, so the previous
//! frame stays current on the wire.
//!
//! The encoders only talk to the [`Backend`] trait, which keeps them
//! testable against a recording fake.

use luma_dmx::DmxBuffer;
use tracing::info;

use crate::backend::Backend;
use crate::personality::Personality;

const WS2801_SLOTS_PER_PIXEL: usize = 3;
const LPD8806_SLOTS_PER_PIXEL: usize = 3;
const P9813_SLOTS_PER_PIXEL: usize = 3;
const APA102_SLOTS_PER_PIXEL: usize = 3;
const APA102_PB_SLOTS_PER_PIXEL: usize = 4;

// Wire bytes per pixel where they differ from the DMX slot count.
const P9813_BUS_BYTES_PER_PIXEL: usize = 4;
const APA102_BUS_BYTES_PER_PIXEL: usize = 4;

const APA102_START_FRAME_BYTES: usize = 4;
/// Three start-mark bits (111) heading every APA102 LED frame.
const APA102_LEDFRAME_START_MARK: u8 = 0xE0;

/// The P9813 wants a zeroed frame ahead of the pixels as a start delimiter.
const P9813_START_FRAME_BYTES: usize = P9813_BUS_BYTES_PER_PIXEL;
/// The P9813 needs two more zeroed frames behind the pixels to latch.
const P9813_LATCH_BYTES: usize = 3 * P9813_BUS_BYTES_PER_PIXEL;

/// Encode `buffer` for `personality` and hand the frame to the backend.
pub fn encode(
    personality: Personality,
    backend: &dyn Backend,
    output: u8,
    buffer: &DmxBuffer,
    start_address: u16,
    pixel_count: u16,
) {
    match personality {
        Personality::Ws2801Individual => {
            ws2801_individual(backend, output, buffer, start_address, pixel_count)
        }
        Personality::Ws2801Combined => {
            ws2801_combined(backend, output, buffer, start_address, pixel_count)
        }
        Personality::Lpd8806Individual => {
            lpd8806_individual(backend, output, buffer, start_address, pixel_count)
        }
        Personality::Lpd8806Combined => {
            lpd8806_combined(backend, output, buffer, start_address, pixel_count)
        }
        Personality::P9813Individual => {
            p9813_individual(backend, output, buffer, start_address, pixel_count)
        }
        Personality::P9813Combined => {
            p9813_combined(backend, output, buffer, start_address, pixel_count)
        }
        Personality::Apa102Individual => {
            apa102_individual(backend, output, buffer, start_address, pixel_count)
        }
        Personality::Apa102Combined => {
            apa102_combined(backend, output, buffer, start_address, pixel_count)
        }
        Personality::Apa102PbIndividual => {
            apa102_pb_individual(backend, output, buffer, start_address, pixel_count)
        }
        Personality::Apa102PbCombined => {
            apa102_pb_combined(backend, output, buffer, start_address, pixel_count)
        }
    }
}

/// WS2801, one DMX pixel per LED. The DMX bytes go onto the wire as-is; LEDs
/// past the end of the frame keep whatever the buffer held before.
pub fn ws2801_individual(
    backend: &dyn Backend,
    output: u8,
    buffer: &DmxBuffer,
    start_address: u16,
    pixel_count: u16,
) {
    // The whole string length is checked out even when the frame only covers
    // part of it.
    let output_length = pixel_count as usize * WS2801_SLOTS_PER_PIXEL;
    {
        let Some(mut out) = backend.checkout(output, output_length, 0) else {
            return;
        };
        buffer.get_range(first_slot(start_address), &mut out);
    }
    backend.commit(output);
}

/// WS2801, one DMX pixel replicated across the string.
pub fn ws2801_combined(
    backend: &dyn Backend,
    output: u8,
    buffer: &DmxBuffer,
    start_address: u16,
    pixel_count: u16,
) {
    let mut pixel_data = [0u8; WS2801_SLOTS_PER_PIXEL];
    let copied = buffer.get_range(first_slot(start_address), &mut pixel_data);
    if copied != WS2801_SLOTS_PER_PIXEL {
        info!(
            "Insufficient DMX data, required {}, got {}",
            WS2801_SLOTS_PER_PIXEL, copied
        );
        return;
    }

    let output_length = pixel_count as usize * WS2801_SLOTS_PER_PIXEL;
    {
        let Some(mut out) = backend.checkout(output, output_length, 0) else {
            return;
        };
        for pixel in out.chunks_exact_mut(WS2801_SLOTS_PER_PIXEL) {
            pixel.copy_from_slice(&pixel_data);
        }
    }
    backend.commit(output);
}

/// LPD8806, one DMX pixel per LED. The wire wants GRB with the top bit set
/// and 7-bit color, plus one latch byte per 32 pixels.
pub fn lpd8806_individual(
    backend: &dyn Backend,
    output: u8,
    buffer: &DmxBuffer,
    start_address: u16,
    pixel_count: u16,
) {
    let pixel_count = pixel_count as usize;
    let latch_bytes = lpd8806_latch_bytes(pixel_count);
    let first_slot = first_slot(start_address);
    if buffer.size().saturating_sub(first_slot) < LPD8806_SLOTS_PER_PIXEL {
        // Not even one pixel of data, don't bother updating.
        return;
    }

    let output_length = pixel_count * LPD8806_SLOTS_PER_PIXEL;
    {
        let Some(mut out) = backend.checkout(output, output_length, latch_bytes) else {
            return;
        };
        let available = output_length.min(buffer.size() - first_slot);
        for i in 0..available / LPD8806_SLOTS_PER_PIXEL {
            let offset = first_slot + i * LPD8806_SLOTS_PER_PIXEL;
            let r = buffer.get(offset);
            let g = buffer.get(offset + 1);
            let b = buffer.get(offset + 2);
            out[i * LPD8806_SLOTS_PER_PIXEL] = 0x80 | (g >> 1);
            out[i * LPD8806_SLOTS_PER_PIXEL + 1] = 0x80 | (r >> 1);
            out[i * LPD8806_SLOTS_PER_PIXEL + 2] = 0x80 | (b >> 1);
        }
    }
    backend.commit(output);
}

/// LPD8806, one DMX pixel replicated across the string.
pub fn lpd8806_combined(
    backend: &dyn Backend,
    output: u8,
    buffer: &DmxBuffer,
    start_address: u16,
    pixel_count: u16,
) {
    let pixel_count = pixel_count as usize;
    let latch_bytes = lpd8806_latch_bytes(pixel_count);

    let mut pixel_data = [0u8; LPD8806_SLOTS_PER_PIXEL];
    let copied = buffer.get_range(first_slot(start_address), &mut pixel_data);
    if copied != LPD8806_SLOTS_PER_PIXEL {
        info!(
            "Insufficient DMX data, required {}, got {}",
            LPD8806_SLOTS_PER_PIXEL, copied
        );
        return;
    }

    // The LEDs take GRB.
    pixel_data.swap(0, 1);

    let output_length = pixel_count * LPD8806_SLOTS_PER_PIXEL;
    {
        let Some(mut out) = backend.checkout(output, output_length, latch_bytes) else {
            return;
        };
        for pixel in out.chunks_exact_mut(LPD8806_SLOTS_PER_PIXEL) {
            for (dst, &src) in pixel.iter_mut().zip(&pixel_data) {
                *dst = 0x80 | (src >> 1);
            }
        }
    }
    backend.commit(output);
}

/// P9813, one DMX pixel per LED. Each LED takes a checksum-flag byte followed
/// by BGR; a zeroed frame leads the string and two more trail it.
pub fn p9813_individual(
    backend: &dyn Backend,
    output: u8,
    buffer: &DmxBuffer,
    start_address: u16,
    pixel_count: u16,
) {
    let pixel_count = pixel_count as usize;
    let first_slot = first_slot(start_address);
    if buffer.size().saturating_sub(first_slot) < P9813_SLOTS_PER_PIXEL {
        // Not even one pixel of data, don't bother updating.
        return;
    }

    let output_length = P9813_START_FRAME_BYTES + pixel_count * P9813_BUS_BYTES_PER_PIXEL;
    {
        let Some(mut out) = backend.checkout(output, output_length, P9813_LATCH_BYTES) else {
            return;
        };
        for i in 0..pixel_count {
            let offset = first_slot + i * P9813_SLOTS_PER_PIXEL;
            // Pixels past the end of the frame go dark.
            let (r, g, b) = if buffer.size().saturating_sub(offset) >= P9813_SLOTS_PER_PIXEL {
                (
                    buffer.get(offset),
                    buffer.get(offset + 1),
                    buffer.get(offset + 2),
                )
            } else {
                (0, 0, 0)
            };
            // The first four bytes stay zero as the start-of-frame delimiter.
            let bus_offset = (i + 1) * P9813_BUS_BYTES_PER_PIXEL;
            out[bus_offset] = p9813_create_flag(r, g, b);
            out[bus_offset + 1] = b;
            out[bus_offset + 2] = g;
            out[bus_offset + 3] = r;
        }
    }
    backend.commit(output);
}

/// P9813, one DMX pixel replicated across the string.
pub fn p9813_combined(
    backend: &dyn Backend,
    output: u8,
    buffer: &DmxBuffer,
    start_address: u16,
    pixel_count: u16,
) {
    let pixel_count = pixel_count as usize;
    let first_slot = first_slot(start_address);
    let available = buffer.size().saturating_sub(first_slot);
    if available < P9813_SLOTS_PER_PIXEL {
        info!(
            "Insufficient DMX data, required {}, got {}",
            P9813_SLOTS_PER_PIXEL, available
        );
        return;
    }

    let r = buffer.get(first_slot);
    let g = buffer.get(first_slot + 1);
    let b = buffer.get(first_slot + 2);
    let pixel_data = [p9813_create_flag(r, g, b), b, g, r];

    let output_length = P9813_START_FRAME_BYTES + pixel_count * P9813_BUS_BYTES_PER_PIXEL;
    {
        let Some(mut out) = backend.checkout(output, output_length, P9813_LATCH_BYTES) else {
            return;
        };
        for i in 0..pixel_count {
            let bus_offset = (i + 1) * P9813_BUS_BYTES_PER_PIXEL;
            out[bus_offset..bus_offset + P9813_BUS_BYTES_PER_PIXEL].copy_from_slice(&pixel_data);
        }
    }
    backend.commit(output);
}

/// APA102, one DMX pixel per LED.
///
/// Frame layout: a 4-byte zero start frame (emitted by output 0 only; the
/// downstream outputs of a chained bus share it), then per LED one byte of
/// start mark plus full brightness (0xFF) and BGR color, then enough latch
/// clocks to push the last pixel through the chain.
pub fn apa102_individual(
    backend: &dyn Backend,
    output: u8,
    buffer: &DmxBuffer,
    start_address: u16,
    pixel_count: u16,
) {
    let pixel_count = pixel_count as usize;
    let first_slot = first_slot(start_address);
    let available = buffer.size().saturating_sub(first_slot);
    if available < APA102_SLOTS_PER_PIXEL {
        info!(
            "Insufficient DMX data, required {}, got {}",
            APA102_SLOTS_PER_PIXEL, available
        );
        return;
    }

    let start_frame = apa102_start_frame_bytes(output);
    let output_length = pixel_count * APA102_BUS_BYTES_PER_PIXEL + start_frame;
    {
        let Some(mut out) =
            backend.checkout(output, output_length, apa102_latch_bytes(pixel_count))
        else {
            return;
        };
        out[..start_frame].fill(0);

        for i in 0..pixel_count {
            let offset = first_slot + i * APA102_SLOTS_PER_PIXEL;
            let bus_offset = start_frame + i * APA102_BUS_BYTES_PER_PIXEL;
            // Start mark plus maximum global brightness; pinning brightness
            // to 31 reduces flickering.
            out[bus_offset] = 0xFF;
            // A pixel whose color slots fall past the end of the frame keeps
            // its previous color at full brightness.
            if buffer.size().saturating_sub(offset) >= APA102_SLOTS_PER_PIXEL {
                out[bus_offset + 1] = buffer.get(offset + 2); // blue
                out[bus_offset + 2] = buffer.get(offset + 1); // green
                out[bus_offset + 3] = buffer.get(offset); // red
            }
        }
    }
    backend.commit(output);
}

/// APA102, one DMX pixel replicated across the string.
pub fn apa102_combined(
    backend: &dyn Backend,
    output: u8,
    buffer: &DmxBuffer,
    start_address: u16,
    pixel_count: u16,
) {
    let pixel_count = pixel_count as usize;
    let first_slot = first_slot(start_address);
    let available = buffer.size().saturating_sub(first_slot);
    if available < APA102_SLOTS_PER_PIXEL {
        info!(
            "Insufficient DMX data, required {}, got {}",
            APA102_SLOTS_PER_PIXEL, available
        );
        return;
    }

    let pixel_data = [
        0xFF,
        buffer.get(first_slot + 2), // blue
        buffer.get(first_slot + 1), // green
        buffer.get(first_slot),     // red
    ];

    let start_frame = apa102_start_frame_bytes(output);
    let output_length = pixel_count * APA102_BUS_BYTES_PER_PIXEL + start_frame;
    {
        let Some(mut out) =
            backend.checkout(output, output_length, apa102_latch_bytes(pixel_count))
        else {
            return;
        };
        out[..start_frame].fill(0);
        for i in 0..pixel_count {
            let bus_offset = start_frame + i * APA102_BUS_BYTES_PER_PIXEL;
            out[bus_offset..bus_offset + APA102_BUS_BYTES_PER_PIXEL].copy_from_slice(&pixel_data);
        }
    }
    backend.commit(output);
}

/// APA102 with per-pixel brightness, one IRGB DMX pixel per LED. The
/// intensity slot is scaled to the 5-bit brightness field under the start
/// mark.
pub fn apa102_pb_individual(
    backend: &dyn Backend,
    output: u8,
    buffer: &DmxBuffer,
    start_address: u16,
    pixel_count: u16,
) {
    let pixel_count = pixel_count as usize;
    let first_slot = first_slot(start_address);
    let available = buffer.size().saturating_sub(first_slot);
    if available < APA102_PB_SLOTS_PER_PIXEL {
        info!(
            "Insufficient DMX data, required {}, got {}",
            APA102_PB_SLOTS_PER_PIXEL, available
        );
        return;
    }

    let start_frame = apa102_start_frame_bytes(output);
    let output_length = pixel_count * APA102_BUS_BYTES_PER_PIXEL + start_frame;
    {
        let Some(mut out) =
            backend.checkout(output, output_length, apa102_latch_bytes(pixel_count))
        else {
            return;
        };
        out[..start_frame].fill(0);

        for i in 0..pixel_count {
            let offset = first_slot + i * APA102_PB_SLOTS_PER_PIXEL;
            if buffer.size().saturating_sub(offset) >= APA102_PB_SLOTS_PER_PIXEL {
                let bus_offset = start_frame + i * APA102_BUS_BYTES_PER_PIXEL;
                out[bus_offset] =
                    APA102_LEDFRAME_START_MARK | apa102_pixel_brightness(buffer.get(offset));
                out[bus_offset + 1] = buffer.get(offset + 3); // blue
                out[bus_offset + 2] = buffer.get(offset + 2); // green
                out[bus_offset + 3] = buffer.get(offset + 1); // red
            }
        }
    }
    backend.commit(output);
}

/// APA102 with per-pixel brightness, one IRGB DMX pixel replicated across
/// the string.
pub fn apa102_pb_combined(
    backend: &dyn Backend,
    output: u8,
    buffer: &DmxBuffer,
    start_address: u16,
    pixel_count: u16,
) {
    let pixel_count = pixel_count as usize;
    let first_slot = first_slot(start_address);
    let available = buffer.size().saturating_sub(first_slot);
    if available < APA102_PB_SLOTS_PER_PIXEL {
        info!(
            "Insufficient DMX data, required {}, got {}",
            APA102_PB_SLOTS_PER_PIXEL, available
        );
        return;
    }

    let pixel_data = [
        APA102_LEDFRAME_START_MARK | apa102_pixel_brightness(buffer.get(first_slot)),
        buffer.get(first_slot + 3), // blue
        buffer.get(first_slot + 2), // green
        buffer.get(first_slot + 1), // red
    ];

    let start_frame = apa102_start_frame_bytes(output);
    let output_length = pixel_count * APA102_BUS_BYTES_PER_PIXEL + start_frame;
    {
        let Some(mut out) =
            backend.checkout(output, output_length, apa102_latch_bytes(pixel_count))
        else {
            return;
        };
        out[..start_frame].fill(0);
        for i in 0..pixel_count {
            let bus_offset = start_frame + i * APA102_BUS_BYTES_PER_PIXEL;
            out[bus_offset..bus_offset + APA102_BUS_BYTES_PER_PIXEL].copy_from_slice(&pixel_data);
        }
    }
    backend.commit(output);
}

fn first_slot(start_address: u16) -> usize {
    start_address.saturating_sub(1) as usize
}

fn lpd8806_latch_bytes(pixel_count: usize) -> usize {
    (pixel_count + 31) / 32
}

/// The flag byte heading each P9813 pixel: the inverted top two bits of each
/// color channel, packed low to high as red, green, blue.
fn p9813_create_flag(red: u8, green: u8, blue: u8) -> u8 {
    let mut flag = (red & 0xC0) >> 6;
    flag |= (green & 0xC0) >> 4;
    flag |= (blue & 0xC0) >> 2;
    !flag
}

/// Only the first output of a chained bus emits the shared start frame.
fn apa102_start_frame_bytes(output: u8) -> usize {
    if output == 0 {
        APA102_START_FRAME_BYTES
    } else {
        0
    }
}

/// Latch clocks for an APA102 chain: at least one bit per two pixels,
/// rounded up to whole bytes. The datasheet's fixed 4-byte end frame only
/// holds up to 64 pixels.
fn apa102_latch_bytes(pixel_count: usize) -> usize {
    let latch_bits = (pixel_count + 1) / 2;
    (latch_bits + 7) / 8
}

/// Scale an 8-bit DMX intensity onto the APA102's 5-bit brightness field.
fn apa102_pixel_brightness(brightness: u8) -> u8 {
    brightness >> 3
}
