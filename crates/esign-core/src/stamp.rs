//! Signature compositing onto PDF pages
//!
//! The signature PNG is decoded once, written as an 8-bit `DeviceRGB` image
//! XObject with a `DeviceGray` soft mask, and drawn on the target page with a
//! single `cm`/`Do` pair. The existing page content is wrapped in `q`/`Q` so
//! whatever graphics state it leaves behind cannot skew the signature.

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};

use crate::error::StampError;
use crate::placement::{compute_placement, resolve_page, PageBox, Placement, PlacementPolicy, PlacementRequest};

/// Prefix for the XObject resource name of stamped signatures
const XOBJECT_PREFIX: &str = "EsignSig";

/// Guard against cyclic `Parent` chains in broken page trees
const MAX_TREE_DEPTH: usize = 64;

/// Result of a stamp: the new document plus where the image went
#[derive(Debug, Clone)]
pub struct StampOutcome {
    pub pdf: Vec<u8>,
    /// 1-based page that received the image
    pub page: u32,
    pub placement: Placement,
}

/// Stamp `image_bytes` onto `pdf_bytes` and return the new document.
pub fn stamp(
    pdf_bytes: &[u8],
    image_bytes: &[u8],
    request: &PlacementRequest,
    policy: PlacementPolicy,
) -> Result<Vec<u8>, StampError> {
    stamp_detailed(pdf_bytes, image_bytes, request, policy).map(|outcome| outcome.pdf)
}

/// Like [`stamp`], also reporting the resolved page and placement.
pub fn stamp_detailed(
    pdf_bytes: &[u8],
    image_bytes: &[u8],
    request: &PlacementRequest,
    policy: PlacementPolicy,
) -> Result<StampOutcome, StampError> {
    let mut doc =
        Document::load_mem(pdf_bytes).map_err(|e| StampError::MalformedDocument(e.to_string()))?;
    let image = SignatureImage::decode(image_bytes)?;

    let pages = doc.get_pages();
    let page = resolve_page(request.page, pages.len() as u32, policy)?;
    let page_id = *pages.get(&page).ok_or_else(|| {
        StampError::MalformedDocument(format!("page {} missing from page tree", page))
    })?;

    let page_box = page_box(&doc, page_id)?;
    let placement = compute_placement(page_box, (image.width, image.height), request)?;

    let xobject_id = image.embed(&mut doc)?;
    let name = register_xobject(&mut doc, page_id, xobject_id)?;
    append_draw_ops(&mut doc, page_id, &name, &placement)?;

    let mut pdf = Vec::new();
    doc.save_to(&mut pdf)
        .map_err(|e| StampError::Serialization(e.to_string()))?;

    tracing::debug!(
        page,
        x = placement.x,
        y = placement.y,
        width = placement.width,
        height = placement.height,
        "Stamped signature"
    );

    Ok(StampOutcome {
        pdf,
        page,
        placement,
    })
}

/// Decoded signature split into color and alpha planes
struct SignatureImage {
    width: u32,
    height: u32,
    rgb: Vec<u8>,
    alpha: Option<Vec<u8>>,
}

impl SignatureImage {
    fn decode(bytes: &[u8]) -> Result<Self, StampError> {
        if bytes.is_empty() {
            return Err(StampError::InvalidImage("image is empty".to_string()));
        }
        let decoded =
            image::load_from_memory(bytes).map_err(|e| StampError::InvalidImage(e.to_string()))?;
        let has_alpha = decoded.color().has_alpha();
        let rgba = decoded.to_rgba8();
        let (width, height) = rgba.dimensions();

        let pixel_count = (width as usize) * (height as usize);
        let mut rgb = Vec::with_capacity(pixel_count * 3);
        let mut alpha = Vec::with_capacity(if has_alpha { pixel_count } else { 0 });
        for pixel in rgba.pixels() {
            let [r, g, b, a] = pixel.0;
            rgb.extend_from_slice(&[r, g, b]);
            if has_alpha {
                alpha.push(a);
            }
        }

        Ok(Self {
            width,
            height,
            rgb,
            alpha: has_alpha.then_some(alpha),
        })
    }

    /// Add the image (and its soft mask) to the document
    fn embed(&self, doc: &mut Document) -> Result<ObjectId, StampError> {
        let mut image_dict = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => self.width as i64,
            "Height" => self.height as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
            "Filter" => "FlateDecode",
        };

        if let Some(alpha) = &self.alpha {
            let smask_id = doc.add_object(
                Stream::new(
                    dictionary! {
                        "Type" => "XObject",
                        "Subtype" => "Image",
                        "Width" => self.width as i64,
                        "Height" => self.height as i64,
                        "ColorSpace" => "DeviceGray",
                        "BitsPerComponent" => 8,
                        "Filter" => "FlateDecode",
                    },
                    deflate(alpha)?,
                )
                .with_compression(false),
            );
            image_dict.set("SMask", Object::Reference(smask_id));
        }

        Ok(doc.add_object(Stream::new(image_dict, deflate(&self.rgb)?).with_compression(false)))
    }
}

fn deflate(data: &[u8]) -> Result<Vec<u8>, StampError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| StampError::Serialization(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| StampError::Serialization(e.to_string()))
}

fn malformed(e: lopdf::Error) -> StampError {
    StampError::MalformedDocument(e.to_string())
}

/// Follow a reference to the object it points at
fn resolve<'a>(doc: &'a Document, object: &'a Object) -> Result<&'a Object, StampError> {
    match object {
        Object::Reference(id) => doc.get_object(*id).map_err(malformed),
        other => Ok(other),
    }
}

/// Look up a page attribute, walking up `Parent` for inheritable keys
fn inherited<'a>(
    doc: &'a Document,
    page_id: ObjectId,
    key: &[u8],
) -> Result<Option<&'a Object>, StampError> {
    let mut current = Some(page_id);
    let mut depth = 0;

    while let Some(id) = current {
        let dict = doc.get_dictionary(id).map_err(malformed)?;
        if let Ok(value) = dict.get(key) {
            return Ok(Some(resolve(doc, value)?));
        }
        depth += 1;
        if depth > MAX_TREE_DEPTH {
            return Err(StampError::MalformedDocument(
                "page tree is too deep or cyclic".to_string(),
            ));
        }
        current = dict.get(b"Parent").and_then(|p| p.as_reference()).ok();
    }

    Ok(None)
}

fn number(doc: &Document, object: &Object) -> Result<f64, StampError> {
    match resolve(doc, object)? {
        Object::Integer(i) => Ok(*i as f64),
        Object::Real(r) => Ok(f64::from(*r)),
        other => Err(StampError::MalformedDocument(format!(
            "expected a number in MediaBox, found {:?}",
            other
        ))),
    }
}

fn page_box(doc: &Document, page_id: ObjectId) -> Result<PageBox, StampError> {
    let media_box = inherited(doc, page_id, b"MediaBox")?
        .ok_or_else(|| StampError::MalformedDocument("page has no MediaBox".to_string()))?;
    let values = media_box.as_array().map_err(malformed)?;
    if values.len() != 4 {
        return Err(StampError::MalformedDocument(format!(
            "MediaBox has {} entries",
            values.len()
        )));
    }

    let mut rect = [0.0; 4];
    for (slot, value) in rect.iter_mut().zip(values) {
        *slot = number(doc, value)?;
    }
    Ok(PageBox::from_media_box(rect))
}

/// Give the page its own Resources carrying the new XObject.
///
/// The effective (possibly inherited or shared) Resources dictionary is
/// copied so other pages referencing it are not touched.
fn register_xobject(
    doc: &mut Document,
    page_id: ObjectId,
    xobject_id: ObjectId,
) -> Result<String, StampError> {
    let mut resources = match inherited(doc, page_id, b"Resources")? {
        Some(object) => object.as_dict().map_err(malformed)?.clone(),
        None => Dictionary::new(),
    };

    let mut xobjects = match resources.get(b"XObject") {
        Ok(object) => resolve(doc, object)?.as_dict().map_err(malformed)?.clone(),
        Err(_) => Dictionary::new(),
    };

    let mut index = 1;
    let name = loop {
        let candidate = format!("{}{}", XOBJECT_PREFIX, index);
        if !xobjects.has(candidate.as_bytes()) {
            break candidate;
        }
        index += 1;
    };

    xobjects.set(name.clone(), Object::Reference(xobject_id));
    resources.set("XObject", Object::Dictionary(xobjects));

    doc.get_dictionary_mut(page_id)
        .map_err(malformed)?
        .set("Resources", Object::Dictionary(resources));

    Ok(name)
}

fn append_draw_ops(
    doc: &mut Document,
    page_id: ObjectId,
    name: &str,
    placement: &Placement,
) -> Result<(), StampError> {
    let existing: Vec<Object> = {
        let page = doc.get_dictionary(page_id).map_err(malformed)?;
        match page.get(b"Contents") {
            Ok(Object::Reference(id)) => match doc.get_object(*id) {
                Ok(Object::Array(items)) => items.clone(),
                _ => vec![Object::Reference(*id)],
            },
            Ok(Object::Array(items)) => items.clone(),
            _ => Vec::new(),
        }
    };

    let draw = format!(
        "q\n{:.4} 0 0 {:.4} {:.4} {:.4} cm\n/{} Do\nQ\n",
        placement.width, placement.height, placement.x, placement.y, name
    );

    let mut contents = Vec::with_capacity(existing.len() + 2);
    if existing.is_empty() {
        contents.push(Object::Reference(
            doc.add_object(Stream::new(dictionary! {}, draw.into_bytes())),
        ));
    } else {
        let open_id = doc.add_object(Stream::new(dictionary! {}, b"q\n".to_vec()));
        let close_id = doc.add_object(Stream::new(
            dictionary! {},
            format!("Q\n{}", draw).into_bytes(),
        ));
        contents.push(Object::Reference(open_id));
        contents.extend(existing);
        contents.push(Object::Reference(close_id));
    }

    doc.get_dictionary_mut(page_id)
        .map_err(malformed)?
        .set("Contents", Object::Array(contents));

    Ok(())
}
