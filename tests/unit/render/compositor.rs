use super::*;
use crate::foundation::core::FrameSize;
use crate::render::canvas::RecordingCanvas;

fn hd() -> FrameSize {
    FrameSize {
        width: 1280,
        height: 720,
    }
}

fn compositor() -> Compositor {
    Compositor::new(LayoutPolicy::for_size(hd(), "Severe Weather Alerts", 6)).unwrap()
}

fn ranked(n: usize) -> Vec<Alert> {
    (0..n)
        .map(|i| Alert::ranked(format!("Event {i}"), format!("Area {i}"), 100 - i as u32))
        .collect()
}

#[test]
fn crawl_joins_entries_with_separator() {
    let alerts = vec![
        Alert::ranked("Tornado Warning", "Dallas", 95),
        Alert::ranked("Flash Flood Warning", "Austin", 75),
    ];
    assert_eq!(
        crawl_text(&alerts, " | "),
        "Tornado Warning - Dallas | Flash Flood Warning - Austin"
    );
    assert_eq!(crawl_text(&[], " | "), "");
}

#[test]
fn urgent_and_elevated_banner_colors() {
    let c = compositor();
    let p = c.layout().palette;

    let urgent = c.plan(&[Alert::ranked("Tornado Emergency", "Moore", 100)], 0, None);
    assert!(urgent.banner.urgent);
    assert_eq!(urgent.banner.fill, p.banner_urgent);

    let elevated = c.plan(&[Alert::ranked("Flash Flood Warning", "Austin", 75)], 0, None);
    assert!(!elevated.banner.urgent);
    assert_eq!(elevated.banner.fill, p.banner_elevated);
}

#[test]
fn empty_list_plans_neutral_state() {
    let c = compositor();
    let plan = c.plan(&[], 1280, None);
    assert_eq!(plan.banner.text, "No active alerts");
    assert_eq!(plan.banner.fill, c.layout().palette.banner_neutral);
    assert!(plan.panel_entries.is_empty());
    assert!(plan.crawl.is_empty());
    assert!(
        plan.ops
            .iter()
            .any(|op| matches!(op, DrawOp::Text { text, .. } if text == "No active alerts"))
    );
}

#[test]
fn panel_is_capped() {
    let c = compositor();
    let plan = c.plan(&ranked(10), 0, None);
    assert_eq!(plan.panel_entries.len(), 6);
    assert_eq!(plan.panel_entries[0], "Event 0");
    assert_eq!(plan.panel_entries[5], "Event 5");
    // The crawl still covers every alert.
    assert!(plan.crawl.contains("Event 9 - Area 9"));
}

#[test]
fn crawl_is_positioned_at_ticker_offset() {
    let c = compositor();
    let plan = c.plan(&ranked(1), -37, None);
    let crawl_op = plan
        .ops
        .iter()
        .find_map(|op| match op {
            DrawOp::Text { origin, text, .. } if *text == plan.crawl => Some(*origin),
            _ => None,
        })
        .unwrap();
    assert_eq!(crawl_op.x, -37.0);
    assert!(crawl_op.y >= c.layout().ticker.y0);
}

#[test]
fn aux_image_is_fit_inside_its_zone() {
    let c = compositor();
    let img = AuxImage::from_premul(200, 100, vec![255; 200 * 100 * 4]).unwrap();
    let plan = c.plan(&[], 0, Some(&img));
    let dest = plan
        .ops
        .iter()
        .find_map(|op| match op {
            DrawOp::Image { dest } => Some(*dest),
            _ => None,
        })
        .unwrap();
    let zone = c.layout().aux;
    assert!(dest.x0 >= zone.x0 && dest.x1 <= zone.x1 + 1e-9);
    assert!(dest.y0 >= zone.y0 && dest.y1 <= zone.y1 + 1e-9);
    assert!((dest.width() / dest.height() - 2.0).abs() < 1e-9);
}

#[test]
fn render_is_deterministic_and_reports_crawl_width() {
    let c = compositor();
    let alerts = ranked(3);
    let img = AuxImage::from_premul(2, 2, vec![255; 16]).unwrap();
    let mut canvas = RecordingCanvas::new(1280, 720);

    let a = c.render(&mut canvas, &alerts, 500, Some(&img)).unwrap();
    let b = c.render(&mut canvas, &alerts, 500, Some(&img)).unwrap();
    assert_eq!(a, b);

    let expected = crawl_text(&alerts, " | ").chars().count() as f32 * 22.0 * 0.5;
    assert_eq!(a.crawl_width, expected.ceil() as u32);
}

#[test]
fn render_rejects_mismatched_canvas() {
    let c = compositor();
    let mut canvas = RecordingCanvas::new(640, 360);
    assert!(c.render(&mut canvas, &[], 0, None).is_err());
}
