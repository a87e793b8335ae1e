use crate::models::BoundingBox;

/// Converts a flat `[x1, y1, x2, y2, ...]` polygon expressed as fractions of the page into
/// an axis-aligned pixel box. Missing page dimensions scale by 1.0. Rotation is discarded.
pub fn normalize_polygon(
    polygon: &[f32],
    page_width: Option<f32>,
    page_height: Option<f32>,
) -> BoundingBox {
    let mut min_x = f32::MAX;
    let mut min_y = f32::MAX;
    let mut max_x = f32::MIN;
    let mut max_y = f32::MIN;
    let mut seen = false;

    for point in polygon.chunks_exact(2) {
        let (px, py) = (point[0], point[1]);
        if !px.is_finite() || !py.is_finite() {
            continue;
        }
        min_x = min_x.min(px);
        min_y = min_y.min(py);
        max_x = max_x.max(px);
        max_y = max_y.max(py);
        seen = true;
    }

    if !seen {
        return BoundingBox::new(0, 0, 1, 1);
    }

    let scale_x = page_width.filter(|value| value.is_finite()).unwrap_or(1.0);
    let scale_y = page_height.filter(|value| value.is_finite()).unwrap_or(1.0);

    let x = (min_x * scale_x).floor() as i32;
    let y = (min_y * scale_y).floor() as i32;
    // Far edges round to the nearest pixel so f32 error cannot shave a pixel off.
    let right = (max_x * scale_x).round() as i32;
    let bottom = (max_y * scale_y).round() as i32;
    let width = right.saturating_sub(x);
    let height = bottom.saturating_sub(y);

    BoundingBox {
        x,
        y,
        width: width.max(1),
        height: height.max(1),
    }
}

pub(crate) fn union_bbox(a: &BoundingBox, b: &BoundingBox) -> BoundingBox {
    let x1 = a.x.min(b.x);
    let y1 = a.y.min(b.y);
    let x2 = (a.x + a.width).max(b.x + b.width);
    let y2 = (a.y + a.height).max(b.y + b.height);
    BoundingBox {
        x: x1,
        y: y1,
        width: x2 - x1,
        height: y2 - y1,
    }
}
