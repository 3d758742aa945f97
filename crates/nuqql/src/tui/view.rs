use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph};
use ratatui::Frame;

use nuqql_core::conversation::ConversationKind;

use super::core::{visible_conversations, Focus, Mode, Model};
use super::scrollback;

pub fn draw(frame: &mut Frame<'_>, model: &mut Model) {
    frame.render_widget(Clear, frame.size());

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .split(frame.size());

    draw_header(frame, model, rows[0]);
    draw_main(frame, model, rows[1]);
    draw_footer(frame, model, rows[2]);
}

fn draw_header(frame: &mut Frame<'_>, model: &Model, area: Rect) {
    let running = model.backends.iter().filter(|b| b.running).count();
    let total = model.backends.len();
    let notifications: u32 = model.conversations.iter().map(|c| c.notifications).sum();

    let mut spans = vec![
        Span::styled("nuqql", Style::default().add_modifier(Modifier::BOLD)),
        Span::raw("  "),
        Span::styled(
            format!("backends: {running}/{total}"),
            Style::default().fg(Color::Gray),
        ),
    ];
    if notifications > 0 {
        spans.push(Span::raw("  "));
        spans.push(Span::styled(
            format!("new: {notifications}"),
            Style::default().fg(Color::Yellow),
        ));
    }
    if let Some(status) = &model.global_status {
        spans.push(Span::raw("  "));
        spans.push(Span::styled(
            format!("status: {status}"),
            Style::default().fg(Color::Gray),
        ));
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn draw_main(frame: &mut Frame<'_>, model: &mut Model, area: Rect) {
    let list_width = if model.zoomed {
        0
    } else {
        area.width as usize * model.config.list_ratio as usize / 100
    } as u16;

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(list_width), Constraint::Min(0)])
        .split(area);

    if !model.zoomed {
        draw_list(frame, model, columns[0]);
    }

    let right = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(3)])
        .split(columns[1]);

    draw_log(frame, model, right[0]);
    draw_input(frame, model, right[1]);
}

fn draw_list(frame: &mut Frame<'_>, model: &Model, area: Rect) {
    let mut block = Block::default().title("Conversations").borders(Borders::ALL);
    if matches!(model.focus, Focus::List) && matches!(model.mode, Mode::Normal | Mode::Filter) {
        block = block.border_style(Style::default().fg(Color::Cyan));
    }
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let visible = visible_conversations(model);
    let height = inner.height as usize;
    let top = (model.list_cursor + 1).saturating_sub(height);

    let mut lines = Vec::new();
    for (row, &idx) in visible.iter().enumerate().skip(top).take(height) {
        let conversation = &model.conversations[idx];
        let marker = if conversation.notifications > 0 {
            format!("({}) ", conversation.notifications)
        } else {
            String::new()
        };
        let status = match conversation.kind {
            ConversationKind::Buddy | ConversationKind::Group => {
                format!(" [{}]", conversation.peer_status.short())
            }
            _ => String::new(),
        };

        let mut style = if conversation.notifications > 0 {
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
        } else if conversation.peer_status.is_offline() {
            Style::default().fg(Color::DarkGray)
        } else {
            Style::default()
        };
        if row == model.list_cursor && matches!(model.focus, Focus::List) {
            style = style.add_modifier(Modifier::REVERSED);
        }

        lines.push(Line::from(Span::styled(
            format!("{marker}{}{status}", conversation.display_name()),
            style,
        )));
    }

    frame.render_widget(Paragraph::new(lines), inner);
}

fn draw_log(frame: &mut Frame<'_>, model: &mut Model, area: Rect) {
    let focus_log = matches!(model.focus, Focus::Log);
    let Some(idx) = model.active_index() else {
        let block = Block::default().title("Log").borders(Borders::ALL);
        let inner = block.inner(area);
        frame.render_widget(block, area);
        frame.render_widget(
            Paragraph::new("no conversation open").style(Style::default().fg(Color::DarkGray)),
            inner,
        );
        return;
    };

    let title = model.conversations[idx].display_name();
    let key = model.conversations[idx].key();
    let mut block = Block::default().title(title).borders(Borders::ALL);
    if focus_log {
        block = block.border_style(Style::default().fg(Color::Cyan));
    }
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let width = inner.width as usize;
    let height = inner.height as usize;

    let split = &mut *model;
    let view = split.views.entry(key).or_default();
    let conversation = &mut split.conversations[idx];
    let lines = view.render(&mut conversation.log, width.max(1), height.max(1));
    let (top, bottom) = scrollback::window(lines.len(), view.cursor, height.max(1));
    let cursor = view.cursor;

    let mut out = Vec::new();
    for (offset, line) in lines[top..bottom].iter().enumerate() {
        let row = top + offset;
        let mut style = if line.own {
            Style::default().fg(Color::Cyan)
        } else if !line.is_read {
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
        } else {
            Style::default()
        };
        if focus_log && row == cursor {
            style = style.add_modifier(Modifier::REVERSED);
        }
        out.push(Line::from(Span::styled(line.text.clone(), style)));
    }

    frame.render_widget(Paragraph::new(out), inner);
}

fn draw_input(frame: &mut Frame<'_>, model: &Model, area: Rect) {
    let (title, content) = match model.mode {
        Mode::Filter => ("Filter", model.filter.clone()),
        Mode::Search => {
            let prefix = if model.search_backward { "?" } else { "/" };
            ("Search", format!("{prefix}{}", model.search))
        }
        _ => ("Input", model.editor.buffer.clone()),
    };

    let mut block = Block::default().title(title).borders(Borders::ALL);
    if matches!(model.mode, Mode::Input | Mode::Filter | Mode::Search) {
        block = block.border_style(Style::default().fg(Color::Cyan));
    }
    let inner = block.inner(area);
    frame.render_widget(block, area);

    // Show the tail of the buffer when it outgrows the pane.
    let visible: String = {
        let max = inner.width.saturating_sub(1) as usize;
        let chars: Vec<char> = content.chars().collect();
        let start = chars.len().saturating_sub(max);
        chars[start..].iter().collect()
    };
    frame.render_widget(Paragraph::new(visible), inner);
}

fn draw_footer(frame: &mut Frame<'_>, model: &Model, area: Rect) {
    if let Some(status) = &model.status_line {
        frame.render_widget(
            Paragraph::new(Span::styled(
                status.clone(),
                Style::default().fg(Color::Red),
            )),
            area,
        );
        return;
    }

    let help = match (model.mode, model.focus) {
        (Mode::Input, _) => "Enter send  Shift+Enter newline  Esc back  Ctrl+C quit",
        (Mode::Filter, _) => "type to filter  Enter keep  Esc clear",
        (Mode::Search, _) => "type pattern  Enter search  Esc cancel",
        (Mode::Normal, Focus::List) => {
            "j/k move  Enter open  / filter  n next unread  q quit"
        }
        (Mode::Normal, _) => {
            "j/k scroll  / ? search  n/N next  z zoom  i input  Esc close  q quit"
        }
    };
    frame.render_widget(
        Paragraph::new(Span::styled(help, Style::default().fg(Color::DarkGray))),
        area,
    );
}
