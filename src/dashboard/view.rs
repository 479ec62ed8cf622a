//! Dashboard rendering.
//!
//! Stateless: everything drawn comes from a [`DashboardState`] snapshot and
//! the wall clock passed in, so tests render against a `TestBackend` with a
//! fixed `now`.

use chrono::{DateTime, Utc};
use ratatui::{
    layout::{Alignment, Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols::Marker,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Chart, Dataset, GraphType, Paragraph},
    Frame,
};

use super::state::{ConnectionStatus, DashboardState};
use crate::command::ServoAngle;
use crate::constants::{CHART_LEAD, CHART_WINDOW};
use crate::telemetry::{value_bounds, Metric};

/// Draw the whole dashboard into `frame`.
pub fn render(frame: &mut Frame<'_>, state: &DashboardState, now: DateTime<Utc>) {
    let [banner, readings, charts, controls, help] = Layout::vertical([
        Constraint::Length(3),
        Constraint::Length(3),
        Constraint::Min(8),
        Constraint::Length(4),
        Constraint::Length(1),
    ])
    .areas(frame.area());

    render_banner(frame, banner, state);
    render_readings(frame, readings, state);

    let chart_areas = Layout::horizontal([Constraint::Ratio(1, 3); 3]).split(charts);
    for (metric, area) in Metric::ALL.into_iter().zip(chart_areas.iter()) {
        render_chart(frame, *area, state, metric, now);
    }

    render_controls(frame, controls, state);
    frame.render_widget(
        Paragraph::new("l: toggle LED  ←/→: servo angle  a: auto  Enter: set servo  q: quit")
            .style(Style::default().fg(Color::DarkGray)),
        help,
    );
}

fn render_banner(frame: &mut Frame<'_>, area: Rect, state: &DashboardState) {
    let (text, color) = match state.status {
        ConnectionStatus::Connecting => ("Connecting to IoT server...", Color::Yellow),
        ConnectionStatus::Connected => ("Connected to IoT server", Color::Green),
        ConnectionStatus::Disconnected => ("Disconnected from IoT server", Color::Red),
    };
    let mut spans = vec![Span::styled(
        text,
        Style::default().fg(color).add_modifier(Modifier::BOLD),
    )];
    if let Some(error) = &state.last_error {
        spans.push(Span::raw("  "));
        spans.push(Span::styled(error.clone(), Style::default().fg(Color::Red)));
    }
    frame.render_widget(
        Paragraph::new(Line::from(spans))
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL).title(" sensorlink ")),
        area,
    );
}

fn render_readings(frame: &mut Frame<'_>, area: Rect, state: &DashboardState) {
    let line = match state.history.latest() {
        Some(latest) => {
            let mut spans = Vec::new();
            for metric in Metric::ALL {
                spans.push(Span::styled(
                    format!("{}: ", metric.label()),
                    Style::default().add_modifier(Modifier::BOLD),
                ));
                spans.push(Span::raw(format!("{:.1} {}   ", metric.value(latest), metric.unit())));
            }
            spans.push(Span::styled(
                format!("at {}", latest.timestamp.format("%H:%M:%S")),
                Style::default().fg(Color::DarkGray),
            ));
            Line::from(spans)
        }
        None => Line::from("Waiting for readings..."),
    };
    frame.render_widget(
        Paragraph::new(line).block(Block::default().borders(Borders::ALL).title(" Latest ")),
        area,
    );
}

fn render_chart(
    frame: &mut Frame<'_>,
    area: Rect,
    state: &DashboardState,
    metric: Metric,
    now: DateTime<Utc>,
) {
    let points = state.history.series(metric, now, CHART_WINDOW, CHART_LEAD);
    let block = Block::default()
        .borders(Borders::ALL)
        .title(format!(" {metric} "));

    let Some((low, high)) = value_bounds(&points) else {
        frame.render_widget(
            Paragraph::new("No data")
                .alignment(Alignment::Center)
                .block(block),
            area,
        );
        return;
    };

    let color = match metric {
        Metric::Temperature => Color::Red,
        Metric::Humidity => Color::Cyan,
        Metric::Pressure => Color::Magenta,
    };
    let dataset = Dataset::default()
        .marker(Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(color))
        .data(&points);

    let x_axis = Axis::default()
        .bounds([-CHART_WINDOW.as_secs_f64(), CHART_LEAD.as_secs_f64()])
        .labels([
            format!("-{}m", CHART_WINDOW.as_secs() / 60),
            "now".to_string(),
        ]);
    let y_axis = Axis::default()
        .bounds([low, high])
        .labels([format!("{low:.1}"), format!("{high:.1}")]);

    frame.render_widget(
        Chart::new(vec![dataset])
            .block(block)
            .x_axis(x_axis)
            .y_axis(y_axis),
        area,
    );
}

fn render_controls(frame: &mut Frame<'_>, area: Rect, state: &DashboardState) {
    let [led_area, servo_area] =
        Layout::horizontal([Constraint::Percentage(40), Constraint::Percentage(60)]).areas(area);

    let led = &state.led;
    let led_line = Line::from(vec![
        Span::raw("LED: "),
        if led.on {
            Span::styled("ON", Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))
        } else {
            Span::styled("OFF", Style::default().fg(Color::DarkGray))
        },
        Span::raw(if led.busy { "  (sending...)" } else { "" }),
    ]);
    frame.render_widget(
        Paragraph::new(led_line).block(Block::default().borders(Borders::ALL).title(" LED ")),
        led_area,
    );

    let servo = &state.servo;
    let mut servo_spans = vec![
        Span::raw(format!("Current: {}", ServoAngle(servo.current))),
        Span::raw(format!("   Target: {}", ServoAngle(servo.target))),
    ];
    if servo.busy {
        servo_spans.push(Span::raw("  (sending...)"));
    } else if !state.controls_enabled() {
        servo_spans.push(Span::styled("  (offline)", Style::default().fg(Color::DarkGray)));
    } else if servo.can_set() {
        servo_spans.push(Span::styled(
            "  [Enter to set]",
            Style::default().fg(Color::Green),
        ));
    }
    let mut lines = vec![Line::from(servo_spans)];
    if let Some(outcome) = &state.last_outcome {
        lines.push(Line::styled(outcome.clone(), Style::default().fg(Color::DarkGray)));
    }
    frame.render_widget(
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title(" Servo ")),
        servo_area,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Telemetry;
    use ratatui::{backend::TestBackend, Terminal};

    fn draw(state: &DashboardState, now: DateTime<Utc>) -> String {
        let backend = TestBackend::new(120, 30);
        let mut terminal = Terminal::new(backend).unwrap();
        terminal.draw(|f| render(f, state, now)).unwrap();
        terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    #[test]
    fn test_render_empty_state() {
        let state = DashboardState::new(50);
        let screen = draw(&state, Utc::now());
        assert!(screen.contains("Connecting to IoT server"));
        assert!(screen.contains("Waiting for readings"));
        assert!(screen.contains("No data"));
        assert!(screen.contains("OFF"));
    }

    #[test]
    fn test_render_with_readings() {
        let now = Utc::now();
        let mut state = DashboardState::new(50);
        state.status = ConnectionStatus::Connected;
        for i in 0..5 {
            state.history.record(Telemetry {
                id: i,
                temperature: 20.0 + i as f64,
                humidity: 50.0,
                pressure: 1012.0,
                timestamp: now - chrono::Duration::seconds(10 * (5 - i)),
            });
        }

        let screen = draw(&state, now);
        assert!(screen.contains("Connected to IoT server"));
        assert!(screen.contains("Temperature (°C)"));
        assert!(screen.contains("24.0"));
        assert!(!screen.contains("No data"));
    }

    #[test]
    fn test_render_servo_pending_target() {
        let mut state = DashboardState::new(50);
        state.servo.target = 120;
        let screen = draw(&state, Utc::now());
        assert!(screen.contains("Target: 120°"));
        assert!(screen.contains("offline"));
        assert!(!screen.contains("Enter to set"));

        state.status = ConnectionStatus::Connected;
        let screen = draw(&state, Utc::now());
        assert!(screen.contains("Enter to set"));

        state.select_servo_auto();
        state.begin_servo_set();
        let screen = draw(&state, Utc::now());
        assert!(screen.contains("Target: auto"));
        assert!(screen.contains("sending"));
    }
}
