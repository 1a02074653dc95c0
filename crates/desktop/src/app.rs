//! Clawface Desktop — egui app state and UI.

use chrono::{DateTime, Local};
use eframe::egui;
use lib::config::{Settings, SettingsPatch, SettingsStore, Theme};
use lib::gateway::GatewayClient;
use lib::session::{ChatSession, Message};
use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::broadcast::error::RecvError;

const CHAT_INPUT_HEIGHT: f32 = 90.0;
const CHAT_MESSAGES_MIN_HEIGHT: f32 = 80.0;
const LOG_BUFFER_MAX_LINES: usize = 2000;

/// Ring buffer of log lines for the Logs screen. Written by DesktopLogger.
static LOG_LINES: OnceLock<Mutex<VecDeque<String>>> = OnceLock::new();

fn log_buffer() -> &'static Mutex<VecDeque<String>> {
    LOG_LINES.get_or_init(|| Mutex::new(VecDeque::new()))
}

fn push_log_line(line: String) {
    if let Ok(mut buf) = log_buffer().lock() {
        buf.push_back(line);
        while buf.len() > LOG_BUFFER_MAX_LINES {
            buf.pop_front();
        }
    }
}

/// Logger that appends to LOG_LINES for display in the Logs screen.
struct DesktopLogger;

impl log::Log for DesktopLogger {
    fn enabled(&self, _: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        push_log_line(log_line(chrono::Local::now(), record.level(), record.args()));
    }

    fn flush(&self) {}
}

fn log_line(at: DateTime<Local>, level: log::Level, message: impl std::fmt::Display) -> String {
    format!("{} [{}] {}", at.format("%H:%M:%S%.3f"), level, message)
}

static LOGGER: DesktopLogger = DesktopLogger;

#[derive(Clone, Copy, PartialEq, Eq, Default)]
enum Screen {
    #[default]
    Chat,
    Settings,
    Logs,
}

/// Result of the last connection check shown on the Settings screen.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Probe {
    Running,
    Reachable,
    Unreachable,
}

pub struct ClawfaceApp {
    runtime: tokio::runtime::Handle,
    session: ChatSession,
    settings: Arc<SettingsStore>,
    current_screen: Screen,
    chat_input: String,
    /// Editable copy of the settings; written back on Save.
    settings_form: Settings,
    settings_status: Option<String>,
    applied_theme: Option<Theme>,
    probe: Option<Probe>,
    probe_receiver: Option<mpsc::Receiver<bool>>,
}

impl ClawfaceApp {
    /// Space between the main screen title and the content below.
    const SCREEN_TITLE_BOTTOM_SPACING: f32 = 18.0;
    /// Space between the bottom of the content and the window edge.
    const SCREEN_FOOTER_SPACING: f32 = 24.0;

    pub fn new(
        cc: &eframe::CreationContext<'_>,
        runtime: tokio::runtime::Handle,
        settings: SettingsStore,
    ) -> Self {
        let _ = LOG_LINES.get_or_init(|| Mutex::new(VecDeque::new()));
        let _ = log::set_logger(&LOGGER);
        log::set_max_level(log::LevelFilter::Debug);
        log::info!("desktop started");

        let settings = Arc::new(settings);
        let session = ChatSession::new(GatewayClient::new(), settings.clone());

        // Repaint whenever the session changes so streamed deltas show up without input.
        let ctx = cc.egui_ctx.clone();
        let mut updates = session.subscribe();
        runtime.spawn(async move {
            loop {
                match updates.recv().await {
                    Ok(_) | Err(RecvError::Lagged(_)) => ctx.request_repaint(),
                    Err(RecvError::Closed) => break,
                }
            }
        });

        let settings_form = settings.get();
        Self {
            runtime,
            session,
            settings,
            current_screen: Screen::default(),
            chat_input: String::new(),
            settings_form,
            settings_status: None,
            applied_theme: None,
            probe: None,
            probe_receiver: None,
        }
    }

    fn apply_theme(&mut self, ctx: &egui::Context) {
        let theme = self.settings.get().theme;
        if self.applied_theme == Some(theme) {
            return;
        }
        match theme {
            Theme::Light => ctx.set_visuals(egui::Visuals::light()),
            Theme::Dark => ctx.set_visuals(egui::Visuals::dark()),
            // eframe follows the OS theme on its own; only reset after an explicit choice.
            Theme::System => {
                if self.applied_theme.is_some() {
                    ctx.set_visuals(egui::Visuals::default());
                }
            }
        }
        self.applied_theme = Some(theme);
    }

    fn send_chat_input(&mut self) {
        let text = self.chat_input.trim().to_string();
        if text.is_empty() {
            return;
        }
        let _guard = self.runtime.enter();
        if self.session.send_message(&text).is_some() {
            self.chat_input.clear();
        }
    }

    fn start_probe(&mut self, ctx: &egui::Context) {
        let config = self.settings_form.session_config();
        let base = config.base_url();
        let token = config.auth_token.unwrap_or_default();
        let client = self.session.client().clone();
        let (tx, rx) = mpsc::channel();
        let ctx = ctx.clone();
        self.runtime.spawn(async move {
            let ok = client.check_connection(&base, &token).await;
            log::info!("connection check {}: {}", base, if ok { "reachable" } else { "unreachable" });
            let _ = tx.send(ok);
            ctx.request_repaint();
        });
        self.probe = Some(Probe::Running);
        self.probe_receiver = Some(rx);
    }

    /// Poll for the probe result. Call each frame.
    fn poll_probe(&mut self) {
        if let Some(rx) = &self.probe_receiver {
            if let Ok(ok) = rx.try_recv() {
                self.probe = Some(if ok { Probe::Reachable } else { Probe::Unreachable });
                self.probe_receiver = None;
            }
        }
    }

    fn save_settings(&mut self) {
        let form = &self.settings_form;
        let patch = SettingsPatch {
            gateway_url: Some(form.gateway_url.clone()),
            model: Some(form.model.clone()),
            agent_id: Some(form.agent_id.clone()),
            token: Some(form.token.clone()),
            theme: Some(form.theme),
        };
        match self.settings.update(patch) {
            Ok(saved) => {
                self.settings_form = saved;
                self.settings_status = Some("Settings saved.".to_string());
            }
            Err(e) => {
                log::error!("saving settings failed: {:#}", e);
                self.settings_status = Some(format!("Could not save settings: {:#}", e));
            }
        }
    }

    fn render_chat_message(ui: &mut egui::Ui, m: &Message, streaming: bool) {
        let is_user = m.is_user();
        let frame = egui::Frame::none()
            .fill(if is_user {
                ui.style().visuals.extreme_bg_color
            } else {
                ui.style().visuals.panel_fill
            })
            .stroke(egui::Stroke::new(
                1.0,
                ui.style().visuals.widgets.noninteractive.bg_stroke.color,
            ))
            .rounding(egui::Rounding::same(8.0))
            .inner_margin(egui::Margin::same(8.0));

        frame.show(ui, |ui| {
            if is_user {
                ui.label(egui::RichText::new(&m.content).strong());
            } else if m.content.is_empty() && streaming {
                ui.spinner();
            } else {
                ui.label(&m.content);
            }
            ui.label(
                egui::RichText::new(m.timestamp.with_timezone(&Local).format("%H:%M").to_string())
                    .small()
                    .weak(),
            );
        });
    }

    /// Render the chat UI: transcript (stick-to-bottom), error, input and controls.
    fn ui_chat(&mut self, ui: &mut egui::Ui) {
        let messages = self.session.messages();
        let streaming = self.session.is_loading();
        let error = self.session.error();

        let row_height = ui.spacing().interact_size.y + 8.0;
        let error_height = if error.is_some() { row_height } else { 0.0 };
        let bottom_section_height =
            CHAT_INPUT_HEIGHT + 8.0 + row_height + error_height + Self::SCREEN_FOOTER_SPACING;
        let messages_height =
            (ui.available_height() - bottom_section_height).max(CHAT_MESSAGES_MIN_HEIGHT);

        egui::ScrollArea::vertical()
            .max_height(messages_height)
            .stick_to_bottom(true)
            .auto_shrink([false, false])
            .show(ui, |ui| {
                if messages.is_empty() {
                    ui.label("Send a message to start the conversation.");
                }
                let last = messages.len().saturating_sub(1);
                for (i, m) in messages.iter().enumerate() {
                    Self::render_chat_message(ui, m, streaming && i == last);
                    ui.add_space(8.0);
                }
            });

        ui.add_space(8.0);
        if let Some(err) = error {
            ui.horizontal(|ui| {
                ui.colored_label(ui.visuals().error_fg_color, &err);
                if ui.small_button("Dismiss").clicked() {
                    self.session.clear_error();
                }
            });
        }

        let response = ui.add_sized(
            [ui.available_width(), CHAT_INPUT_HEIGHT],
            egui::TextEdit::multiline(&mut self.chat_input)
                .hint_text("Message (Ctrl+Enter to send)"),
        );
        let submit = response.has_focus()
            && ui.input(|i| i.key_pressed(egui::Key::Enter) && i.modifiers.command);
        ui.add_space(8.0);

        let mut send_now = submit;
        ui.horizontal(|ui| {
            let can_send = !streaming && !self.chat_input.trim().is_empty();
            if ui.add_enabled(can_send, egui::Button::new("Send")).clicked() {
                send_now = true;
            }
            if streaming && ui.button("Stop").clicked() {
                self.session.stop_generation();
            }
            if ui
                .add_enabled(!messages.is_empty(), egui::Button::new("Clear"))
                .clicked()
            {
                self.session.clear_messages();
            }
            if streaming {
                ui.spinner();
            }
        });
        if send_now && !streaming {
            self.send_chat_input();
        }
    }

    fn ui_settings_screen(&mut self, ui: &mut egui::Ui) {
        ui.add_space(24.0);
        ui.heading("Settings");
        ui.add_space(Self::SCREEN_TITLE_BOTTOM_SPACING);

        egui::Grid::new("settings_grid")
            .num_columns(2)
            .spacing([16.0, 8.0])
            .show(ui, |ui| {
                ui.label("Gateway URL");
                ui.text_edit_singleline(&mut self.settings_form.gateway_url);
                ui.end_row();

                ui.label("Model");
                ui.text_edit_singleline(&mut self.settings_form.model);
                ui.end_row();

                ui.label("Agent ID");
                ui.text_edit_singleline(&mut self.settings_form.agent_id);
                ui.end_row();

                ui.label("Token");
                ui.add(egui::TextEdit::singleline(&mut self.settings_form.token).password(true));
                ui.end_row();

                ui.label("Theme");
                egui::ComboBox::from_id_source("theme_select")
                    .selected_text(self.settings_form.theme.as_str())
                    .show_ui(ui, |ui| {
                        for theme in Theme::ALL {
                            ui.selectable_value(&mut self.settings_form.theme, theme, theme.as_str());
                        }
                    });
                ui.end_row();
            });

        ui.add_space(16.0);
        ui.horizontal(|ui| {
            if ui.button("Save").clicked() {
                self.save_settings();
            }
            if ui.button("Revert").clicked() {
                self.settings_form = self.settings.get();
                self.settings_status = None;
            }
            let probing = self.probe == Some(Probe::Running);
            if ui
                .add_enabled(!probing, egui::Button::new("Check connection"))
                .clicked()
            {
                let ctx = ui.ctx().clone();
                self.start_probe(&ctx);
            }
            match self.probe {
                Some(Probe::Running) => {
                    ui.spinner();
                }
                Some(Probe::Reachable) => {
                    ui.label("Gateway reachable");
                }
                Some(Probe::Unreachable) => {
                    ui.colored_label(ui.visuals().error_fg_color, "Gateway not reachable");
                }
                None => {}
            }
        });
        if let Some(ref status) = self.settings_status {
            ui.add_space(8.0);
            ui.label(status);
        }
    }

    fn ui_logs_screen(&self, ui: &mut egui::Ui) {
        ui.add_space(24.0);
        ui.heading("Logs");
        ui.add_space(Self::SCREEN_TITLE_BOTTOM_SPACING);

        let lines: Vec<String> = log_buffer()
            .lock()
            .map(|b| b.iter().cloned().collect())
            .unwrap_or_default();

        let available = ui.available_height();
        let scroll_height = (available - Self::SCREEN_FOOTER_SPACING).max(0.0);
        egui::ScrollArea::vertical()
            .max_height(scroll_height)
            .stick_to_bottom(true)
            .show(ui, |ui| {
                for line in &lines {
                    ui.label(
                        egui::RichText::new(line.as_str()).family(egui::FontFamily::Monospace),
                    );
                }
                if lines.is_empty() {
                    ui.label("No log output yet.");
                }
            });
        ui.add_space(Self::SCREEN_FOOTER_SPACING);
    }
}

impl eframe::App for ClawfaceApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.apply_theme(ctx);
        self.poll_probe();

        egui::TopBottomPanel::top("header").show(ctx, |ui| {
            egui::Frame::none()
                .inner_margin(egui::Margin::symmetric(24.0, 0.0))
                .show(ui, |ui| {
                    ui.add_space(12.0);
                    ui.horizontal(|ui| {
                        ui.heading("Clawface");
                        ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                            let settings = self.settings.get();
                            ui.label(egui::RichText::new(format!("{} · {}", settings.gateway_url, settings.model)).weak());
                        });
                    });
                    ui.add_space(12.0);
                });
        });

        let current_screen = &mut self.current_screen;
        egui::SidePanel::left("sidebar")
            .resizable(false)
            .exact_width(140.0)
            .show(ctx, |ui| {
                egui::Frame::none()
                    .inner_margin(egui::Margin::symmetric(24.0, 0.0))
                    .show(ui, |ui| {
                        ui.add_space(24.0);
                        if ui.selectable_label(*current_screen == Screen::Chat, "Chat").clicked() {
                            *current_screen = Screen::Chat;
                        }
                        ui.add_space(12.0);
                        if ui.selectable_label(*current_screen == Screen::Settings, "Settings").clicked() {
                            *current_screen = Screen::Settings;
                        }
                        ui.add_space(12.0);
                        if ui.selectable_label(*current_screen == Screen::Logs, "Logs").clicked() {
                            *current_screen = Screen::Logs;
                        }
                    });
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            egui::Frame::none()
                .inner_margin(egui::Margin::symmetric(24.0, 0.0))
                .show(ui, |ui| match self.current_screen {
                    Screen::Chat => {
                        ui.add_space(24.0);
                        ui.heading("Chat");
                        ui.add_space(Self::SCREEN_TITLE_BOTTOM_SPACING);
                        self.ui_chat(ui);
                    }
                    Screen::Settings => self.ui_settings_screen(ui),
                    Screen::Logs => self.ui_logs_screen(ui),
                });
        });
    }
}
