use std::path::Path;

use chrono::NaiveDate;
use exif::{Field, In, Tag, Value};
use image::{
    DynamicImage, ImageDecoder, ImageFormat, ImageReader, Limits, RgbaImage, imageops::FilterType,
};
use tracing::debug;

use crate::media::MediaError;
use api::photo::{EditPhotoReq, GpsCoordinate, PhotoMetadata};

// metadata extraction
//
// exif is optional and frequently malformed, so each field is read on its own
// and any failure just leaves that field empty
pub fn extract_metadata(path: &Path) -> Option<PhotoMetadata> {
    debug!("started extracting metadata");

    // following the exif docs, open the file synchronously and read from the container
    let file = std::fs::File::open(path).ok()?;

    let mut bufreader = std::io::BufReader::new(file);

    let exif = match exif::Reader::new().read_from_container(&mut bufreader) {
        Ok(exif) => exif,
        Err(err) => {
            debug!({ error = %err }, "no usable exif block");
            return None;
        }
    };

    let metadata = metadata_from_fields(|tag| exif.get_field(tag, In::PRIMARY));

    debug!({ found = metadata.is_some() }, "finished extracting metadata");

    metadata
}

pub fn metadata_from_fields<'a, F>(lookup: F) -> Option<PhotoMetadata>
where
    F: Fn(Tag) -> Option<&'a Field>,
{
    let ascii = |tag| lookup(tag).and_then(|f| ascii_value(&f.value));
    let rational = |tag| lookup(tag).and_then(|f| rational_value(&f.value));

    let gps = match (
        lookup(Tag::GPSLatitude),
        lookup(Tag::GPSLatitudeRef),
        lookup(Tag::GPSLongitude),
        lookup(Tag::GPSLongitudeRef),
    ) {
        (Some(lat), Some(lat_ref), Some(lon), Some(lon_ref)) => {
            gps_value(&lat.value, &lat_ref.value, &lon.value, &lon_ref.value)
        }
        _ => None,
    };

    let taken_at = lookup(Tag::DateTimeOriginal)
        .and_then(|f| timestamp_value(&f.value))
        .or_else(|| lookup(Tag::DateTime).and_then(|f| timestamp_value(&f.value)));

    let metadata = PhotoMetadata {
        make: ascii(Tag::Make),
        model: ascii(Tag::Model),
        lens: ascii(Tag::LensModel),
        iso: lookup(Tag::PhotographicSensitivity).and_then(|f| f.value.get_uint(0)),
        aperture: rational(Tag::FNumber),
        shutter_speed: lookup(Tag::ExposureTime).and_then(|f| shutter_value(&f.value)),
        focal_length: rational(Tag::FocalLength),
        gps,
        taken_at,
    };

    if metadata.is_empty() {
        None
    } else {
        Some(metadata)
    }
}

fn ascii_value(value: &Value) -> Option<String> {
    let Value::Ascii(parts) = value else {
        return None;
    };

    let raw = String::from_utf8_lossy(parts.first()?);
    let cleaned = raw.trim_matches(|c: char| c == '\0' || c == '"' || c.is_whitespace());

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_owned())
    }
}

fn rational_value(value: &Value) -> Option<f64> {
    let Value::Rational(parts) = value else {
        return None;
    };

    let first = parts.first()?;
    if first.denom == 0 {
        return None;
    }

    Some(first.to_f64())
}

// exposure time as a fraction, e.g. 1/250
fn shutter_value(value: &Value) -> Option<String> {
    let Value::Rational(parts) = value else {
        return None;
    };

    let first = parts.first()?;
    if first.denom == 0 {
        return None;
    }

    if first.num == 1 {
        Some(format!("1/{}", first.denom))
    } else {
        Some(format!("{}/{}", first.num, first.denom))
    }
}

// degrees, minutes, seconds plus a hemisphere reference
fn dms_value(value: &Value, reference: &Value, negative: char) -> Option<f64> {
    let Value::Rational(parts) = value else {
        return None;
    };

    if parts.len() < 3 || parts.iter().take(3).any(|r| r.denom == 0) {
        return None;
    }

    let degrees = parts[0].to_f64() + parts[1].to_f64() / 60.0 + parts[2].to_f64() / 3600.0;

    let reference = ascii_value(reference)?.to_ascii_uppercase();
    if reference.starts_with(negative) {
        Some(-degrees)
    } else {
        Some(degrees)
    }
}

fn gps_value(lat: &Value, lat_ref: &Value, lon: &Value, lon_ref: &Value) -> Option<GpsCoordinate> {
    Some(GpsCoordinate {
        latitude: dms_value(lat, lat_ref, 'S')?,
        longitude: dms_value(lon, lon_ref, 'W')?,
    })
}

// exif datetimes carry no zone, so they are read as utc
fn timestamp_value(value: &Value) -> Option<i64> {
    let Value::Ascii(parts) = value else {
        return None;
    };

    let dt = exif::DateTime::from_ascii(parts.first()?).ok()?;

    let timestamp = NaiveDate::from_ymd_opt(dt.year.into(), dt.month.into(), dt.day.into())?
        .and_hms_opt(dt.hour.into(), dt.minute.into(), dt.second.into())?
        .and_utc()
        .timestamp();

    Some(timestamp)
}

// decode an image, applying the exif orientation so that derived images come
// out the right way up even though they do not carry the exif block along
// largest accepted side of a decoded image, in pixels
pub const MAX_IMAGE_SIDE: u32 = 20_000;

// thumbnails are never taller than this many times their width
pub const MAX_THUMBNAIL_ASPECT: u32 = 4;

fn decode_limits() -> Limits {
    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_IMAGE_SIDE);
    limits.max_image_height = Some(MAX_IMAGE_SIDE);
    limits
}

fn open_oriented(path: &Path) -> Result<DynamicImage, MediaError> {
    let mut reader = ImageReader::open(path)?.with_guessed_format()?;
    reader.limits(decode_limits());

    let mut decoder = reader
        .into_decoder()
        .map_err(|err| MediaError::UnsupportedFormat(err.to_string()))?;

    let orientation = decoder
        .orientation()
        .map_err(|err| MediaError::UnsupportedFormat(err.to_string()))?;

    debug!({orientation = ?orientation}, "orientation for image");

    let mut image = DynamicImage::from_decoder(decoder)
        .map_err(|err| MediaError::UnsupportedFormat(err.to_string()))?;

    image.apply_orientation(orientation);

    Ok(image)
}

fn save_image(image: DynamicImage, path: &Path) -> Result<(), MediaError> {
    let format = ImageFormat::from_path(path).unwrap_or(ImageFormat::Jpeg);

    // jpeg has no alpha channel, and the other encoders are happiest with
    // whichever of rgb/rgba matches the source
    let image = if format == ImageFormat::Jpeg || !image.color().has_alpha() {
        DynamicImage::ImageRgb8(image.to_rgb8())
    } else {
        DynamicImage::ImageRgba8(image.to_rgba8())
    };

    image
        .save_with_format(path, format)
        .map_err(|err| MediaError::Encode(err.to_string()))
}

// thumbnail generation
//
// the thumbnail is a jpeg that fits in a box of the requested width and
// MAX_THUMBNAIL_ASPECT times that height, preserving the aspect ratio; images
// already smaller than the box are not upscaled
pub fn create_image_thumbnail(
    original_path: &Path,
    thumbnail_path: &Path,
    width: u32,
) -> Result<(), MediaError> {
    debug!("started creating thumbnail");

    let image = open_oriented(original_path)?;

    let width = width.max(1);
    let box_width = width.min(image.width());
    let box_height = width
        .saturating_mul(MAX_THUMBNAIL_ASPECT)
        .min(image.height());

    let thumbnail = image.resize(box_width, box_height, FilterType::Lanczos3);

    DynamicImage::ImageRgb8(thumbnail.to_rgb8())
        .save_with_format(thumbnail_path, ImageFormat::Jpeg)
        .map_err(|err| MediaError::Encode(err.to_string()))?;

    debug!("finished creating thumbnail");

    Ok(())
}

// clamp a requested crop against the image bounds
//
// returns None when there is nothing to crop, either because no crop was
// requested or because the rectangle misses the image entirely
fn clamp_crop(edit: &EditPhotoReq, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let crop = edit.crop?;
    if crop.width <= 0 || crop.height <= 0 {
        return None;
    }

    let x0 = crop.x.max(0);
    let y0 = crop.y.max(0);
    let x1 = crop.x.saturating_add(crop.width).min(width as i64);
    let y1 = crop.y.saturating_add(crop.height).min(height as i64);

    if x1 <= x0 || y1 <= y0 {
        return None;
    }

    Some((x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
}

fn clamp_percent(p: f64) -> f64 {
    p.clamp(-100.0, 100.0)
}

fn clamp_channel(v: f64) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

// per-channel lookup table for brightness and contrast, which are both
// functions of a single channel value
fn tone_table(brightness: f64, contrast: f64) -> [u8; 256] {
    let shift = 255.0 * clamp_percent(brightness) / 100.0;
    let scale = (100.0 + clamp_percent(contrast)) / 100.0;

    let mut table = [0u8; 256];
    for (i, entry) in table.iter_mut().enumerate() {
        let mut v = i as f64;

        if brightness != 0.0 {
            v = (v + shift).clamp(0.0, 255.0);
        }

        if contrast != 0.0 {
            v = ((v / 255.0 - 0.5) * scale + 0.5) * 255.0;
        }

        *entry = clamp_channel(v);
    }

    table
}

// scale each channel's distance from the pixel's luminance
fn saturate(buffer: &mut RgbaImage, saturation: f64) {
    let factor = 1.0 + clamp_percent(saturation) / 100.0;

    for pixel in buffer.pixels_mut() {
        let [r, g, b, _] = pixel.0;
        let luma = 0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64;

        for c in pixel.0.iter_mut().take(3) {
            *c = clamp_channel(luma + (*c as f64 - luma) * factor);
        }
    }
}

// non-destructive edit: read src, write the result to dst
//
// the output format follows the extension of dst
pub fn edit_image(
    original_path: &Path,
    edited_path: &Path,
    edit: &EditPhotoReq,
) -> Result<(), MediaError> {
    debug!("started editing image");

    let mut image = open_oriented(original_path)?;

    if let Some((x, y, w, h)) = clamp_crop(edit, image.width(), image.height()) {
        debug!({ x = x, y = y, width = w, height = h }, "cropping image");
        image = image.crop_imm(x, y, w, h);
    }

    let has_alpha = image.color().has_alpha();

    if edit.brightness != 0.0 || edit.contrast != 0.0 || edit.saturation != 0.0 {
        let mut buffer = image.to_rgba8();

        if edit.brightness != 0.0 || edit.contrast != 0.0 {
            let table = tone_table(edit.brightness, edit.contrast);

            for pixel in buffer.pixels_mut() {
                for c in pixel.0.iter_mut().take(3) {
                    *c = table[*c as usize];
                }
            }
        }

        if edit.saturation != 0.0 {
            saturate(&mut buffer, edit.saturation);
        }

        image = if has_alpha {
            DynamicImage::ImageRgba8(buffer)
        } else {
            DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(buffer).to_rgb8())
        };
    }

    save_image(image, edited_path)?;

    debug!("finished editing image");

    Ok(())
}
