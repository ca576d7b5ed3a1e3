use chrono::Utc;
use iced::alignment::Horizontal;
use iced::widget::image::{self, Image};
use iced::widget::{button, column, container, row, scrollable, text, text_input, Column, Space};
use iced::{theme, Alignment, Background, Border, Color, Element, Length, Theme};

use super::{App, AppMessage, AuthMode, Field, Overlay, Screen, ToastKind};
use crate::calculator::{Key, Operator};
use crate::conversation::{Body, MessageItem};
use crate::format::{avatar_rgb, initials, message_time, time_ago};
use crate::inbox::InboxRow;
use crate::models::MediaType;
use crate::stories::Ring;
use crate::tenor::GifKind;

const MUTED: Color = Color::from_rgb(0.5, 0.5, 0.5);
const ACCENT: Color = Color::from_rgb(0.2, 0.6, 1.0);
const DANGER: Color = Color::from_rgb(0.85, 0.25, 0.25);
const GIF_COLUMNS: usize = 4;

fn card<'a>(content: impl Into<Element<'a, AppMessage>>) -> container::Container<'a, AppMessage> {
    container(content)
        .padding(20)
        .max_width(520)
        .style(|_theme: &Theme| container::Appearance {
            background: Some(Background::Color(Color::from_rgba(0.5, 0.5, 0.5, 0.12))),
            border: Border {
                color: Color::from_rgb(0.7, 0.7, 0.7),
                width: 1.0,
                radius: 8.0.into(),
            },
            ..Default::default()
        })
}

fn input<'a>(placeholder: &str, value: &str, field: Field) -> text_input::TextInput<'a, AppMessage> {
    text_input(placeholder, value)
        .on_input(move |v| AppMessage::Input(field.clone(), v))
        .padding(10)
        .style(theme::TextInput::Default)
}

fn key_button<'a>(key: Key) -> Element<'a, AppMessage> {
    let style = match key {
        Key::Equals => theme::Button::Primary,
        Key::Op(_) => theme::Button::Secondary,
        Key::Clear | Key::Backspace => theme::Button::Destructive,
        _ => theme::Button::Secondary,
    };
    button(
        text(key.label())
            .size(24)
            .horizontal_alignment(Horizontal::Center)
            .width(Length::Fill),
    )
    .on_press(AppMessage::Key(key))
    .padding(14)
    .width(Length::Fixed(72.0))
    .style(style)
    .into()
}

impl App {
    pub(super) fn render(&self) -> Element<AppMessage> {
        let body = match self.overlay {
            Some(overlay) => self.overlay_view(overlay),
            None => match self.screen {
                Screen::Calculator => self.calculator_view(),
                Screen::Chat => self.chat_view(),
            },
        };

        let mut layout = Column::new().spacing(10).padding(10);
        for toast in &self.toasts {
            let color = match toast.kind {
                ToastKind::Success => Color::from_rgb(0.2, 0.65, 0.35),
                ToastKind::Warning => Color::from_rgb(0.9, 0.6, 0.1),
                ToastKind::Error => DANGER,
            };
            layout = layout.push(
                container(
                    row![
                        column![text(&toast.title).size(16), text(&toast.body).size(14)].spacing(2),
                        Space::with_width(Length::Fill),
                        button("×")
                            .on_press(AppMessage::DismissToast(toast.id))
                            .style(theme::Button::Text),
                    ]
                    .align_items(Alignment::Center),
                )
                .padding(10)
                .width(Length::Fill)
                .style(move |_theme: &Theme| container::Appearance {
                    text_color: Some(Color::WHITE),
                    background: Some(Background::Color(color)),
                    border: Border {
                        radius: 6.0.into(),
                        ..Default::default()
                    },
                    ..Default::default()
                }),
            );
        }
        container(layout.push(body))
            .width(Length::Fill)
            .height(Length::Fill)
            .into()
    }

    /// Remote images the current screen wants to draw.
    pub(super) fn visible_image_urls(&self) -> Vec<String> {
        let mut urls = Vec::new();
        if self.screen != Screen::Chat {
            return urls;
        }
        match self.overlay {
            Some(Overlay::Gifs) => {
                if let Some(picker) = &self.gifs {
                    urls.extend(picker.tiles().iter().cloned());
                }
            }
            Some(Overlay::Story) => {
                if let Some(story) = self.viewer.and_then(|v| v.current(&self.stories)) {
                    if story.media_type != MediaType::Video {
                        urls.push(story.media_url.clone());
                    }
                }
            }
            _ => {}
        }
        urls.extend(self.inbox.profiles().into_iter().filter_map(|p| p.avatar_url));
        if let Some(url) = self.account.as_ref().and_then(|a| a.profile.avatar_url.clone()) {
            urls.push(url);
        }
        if let Some(conversation) = &self.conversation {
            for item in conversation.items() {
                if let Body::Image(url) = item.body {
                    urls.push(url);
                }
                if let Some(thumb) = item.reply.and_then(|r| r.thumbnail) {
                    urls.push(thumb);
                }
            }
        }
        urls.retain(|u| !u.is_empty());
        urls
    }

    fn avatar(&self, name: &str, url: Option<&str>, size: f32) -> Element<AppMessage> {
        if let Some(handle) = url.and_then(|u| self.images.get(u)) {
            return Image::<image::Handle>::new(handle.clone())
                .width(Length::Fixed(size))
                .height(Length::Fixed(size))
                .into();
        }
        let (r, g, b) = avatar_rgb(name);
        container(text(initials(name)).size(size * 0.4))
            .width(Length::Fixed(size))
            .height(Length::Fixed(size))
            .center_x()
            .center_y()
            .style(move |_theme: &Theme| container::Appearance {
                text_color: Some(Color::WHITE),
                background: Some(Background::Color(Color::from_rgb(r, g, b))),
                border: Border {
                    radius: (size / 2.0).into(),
                    ..Default::default()
                },
                ..Default::default()
            })
            .into()
    }

    fn picture(&self, url: &str, size: f32) -> Element<AppMessage> {
        match self.images.get(url) {
            Some(handle) => Image::<image::Handle>::new(handle.clone()).width(Length::Fixed(size)).into(),
            None => text("Loading image…").size(12).style(MUTED).into(),
        }
    }

    fn calculator_view(&self) -> Element<AppMessage> {
        let mut actions = row![].spacing(10);
        match &self.account {
            None => {
                actions = actions.push(
                    button("Sign in")
                        .on_press(AppMessage::OpenOverlay(Overlay::Auth))
                        .padding(10),
                );
            }
            Some(account) if account.needs_passcode => {
                actions = actions.push(
                    button("Set passcode")
                        .on_press(AppMessage::OpenOverlay(Overlay::Passcode))
                        .padding(10),
                );
            }
            Some(_) => {}
        }
        actions = actions.push(
            button(if self.dark { "Light" } else { "Dark" })
                .on_press(AppMessage::ToggleTheme)
                .padding(10)
                .style(theme::Button::Secondary),
        );

        let display = container(
            column![
                text(self.calculator.input()).size(16).style(MUTED),
                text(self.calculator.display()).size(40),
            ]
            .align_items(Alignment::End)
            .width(Length::Fill),
        )
        .padding(10)
        .width(Length::Fixed(318.0));

        let layout = [
            vec![Key::Clear, Key::Backspace, Key::Op(Operator::Div), Key::Op(Operator::Mul)],
            vec![Key::Digit(7), Key::Digit(8), Key::Digit(9), Key::Op(Operator::Sub)],
            vec![Key::Digit(4), Key::Digit(5), Key::Digit(6), Key::Op(Operator::Add)],
            vec![Key::Digit(1), Key::Digit(2), Key::Digit(3), Key::Equals],
            vec![Key::Digit(0), Key::Dot],
        ];
        let keypad = column(
            layout
                .into_iter()
                .map(|keys| row(keys.into_iter().map(key_button).collect::<Vec<_>>()).spacing(10).into())
                .collect::<Vec<_>>(),
        )
        .spacing(10);

        container(
            column![actions, display, keypad]
                .spacing(20)
                .align_items(Alignment::Center),
        )
        .center_x()
        .center_y()
        .width(Length::Fill)
        .height(Length::Fill)
        .into()
    }

    fn overlay_view(&self, overlay: Overlay) -> Element<AppMessage> {
        let (title, content) = match overlay {
            Overlay::Auth => ("Account", self.auth_view()),
            Overlay::Passcode => ("Set passcode", self.passcode_view()),
            Overlay::Gifs => ("Pick one", self.gif_view()),
            Overlay::Story => ("Story", self.story_view()),
            Overlay::AddStory => ("Add story", self.add_story_view()),
            Overlay::Profile => ("Profile", self.profile_view()),
        };
        let header = row![
            text(title).size(24),
            Space::with_width(Length::Fill),
            button("Close")
                .on_press(AppMessage::CloseOverlay)
                .style(theme::Button::Secondary),
        ]
        .align_items(Alignment::Center);

        container(card(column![header, content].spacing(20)))
            .center_x()
            .center_y()
            .width(Length::Fill)
            .height(Length::Fill)
            .into()
    }

    fn auth_view(&self) -> Element<AppMessage> {
        let form = &self.auth;
        let tab = |label: &'static str, mode: AuthMode| {
            button(label)
                .on_press(AppMessage::AuthMode(mode))
                .padding(8)
                .style(if form.mode == mode {
                    theme::Button::Primary
                } else {
                    theme::Button::Secondary
                })
        };

        let submit_message = match form.mode {
            AuthMode::SignIn => AppMessage::SignIn,
            AuthMode::SignUp => AppMessage::SignUp,
        };
        let mut fields = column![
            row![tab("Sign in", AuthMode::SignIn), tab("Create account", AuthMode::SignUp)].spacing(10),
            input("Email", &form.email, Field::Email),
        ]
        .spacing(10);
        if form.mode == AuthMode::SignUp {
            fields = fields.push(input("Username", &form.username, Field::Username));
        }
        fields = fields.push(
            input("Password", &form.password, Field::Password)
                .secure(true)
                .on_submit(submit_message.clone()),
        );
        if form.mode == AuthMode::SignUp {
            fields = fields
                .push(text("Calculator passcode (optional, digits only)").size(14).style(MUTED))
                .push(input("Passcode", &form.passcode, Field::SignupPasscode).secure(true))
                .push(input("Repeat passcode", &form.passcode_confirm, Field::SignupPasscodeConfirm).secure(true));
        }
        if let Some(error) = &form.error {
            fields = fields.push(text(error).size(14).style(DANGER));
        }
        let label = match (form.busy, form.mode) {
            (true, _) => "Please wait…",
            (false, AuthMode::SignIn) => "Sign in",
            (false, AuthMode::SignUp) => "Create account",
        };
        let mut submit = button(label).padding(10).style(theme::Button::Primary);
        if !form.busy {
            submit = submit.on_press(submit_message);
        }
        fields.push(submit).into()
    }

    fn passcode_view(&self) -> Element<AppMessage> {
        let form = &self.passcode;
        let mut content = column![
            text("Digits only, at least 4. Type it on the calculator and press = to unlock.")
                .size(14)
                .style(MUTED),
            input("Passcode", &form.first, Field::Passcode).secure(true),
            input("Repeat passcode", &form.second, Field::PasscodeConfirm)
                .secure(true)
                .on_submit(AppMessage::SavePasscode),
        ]
        .spacing(10);
        if let Some(error) = &form.error {
            content = content.push(text(error).size(14).style(DANGER));
        }
        let mut save = button(if form.busy { "Saving…" } else { "Save passcode" })
            .padding(10)
            .style(theme::Button::Primary);
        if !form.busy {
            save = save.on_press(AppMessage::SavePasscode);
        }
        content.push(save).into()
    }

    fn chat_view(&self) -> Element<AppMessage> {
        let me_name = self
            .account
            .as_ref()
            .map(|a| a.profile.display_name().to_string())
            .unwrap_or_default();
        let me_avatar = self.account.as_ref().and_then(|a| a.profile.avatar_url.as_deref());
        let header = row![
            self.avatar(&me_name, me_avatar, 32.0),
            text(&me_name).size(20),
            Space::with_width(Length::Fill),
            button("Add story").on_press(AppMessage::OpenOverlay(Overlay::AddStory)),
            button("Profile").on_press(AppMessage::OpenOverlay(Overlay::Profile)),
            button("Passcode")
                .on_press(AppMessage::OpenOverlay(Overlay::Passcode))
                .style(theme::Button::Secondary),
            button(if self.dark { "Light" } else { "Dark" })
                .on_press(AppMessage::ToggleTheme)
                .style(theme::Button::Secondary),
            button("Sign out")
                .on_press(AppMessage::SignOut)
                .style(theme::Button::Destructive),
        ]
        .spacing(10)
        .align_items(Alignment::Center);

        let main = match (&self.conversation, self.opening) {
            (Some(_), _) => self.conversation_view(),
            (None, Some(_)) => container(text("Loading…").style(MUTED))
                .center_x()
                .center_y()
                .width(Length::Fill)
                .height(Length::Fill)
                .into(),
            (None, None) => container(text("Select a user to start chatting").size(20).style(MUTED))
                .center_x()
                .center_y()
                .width(Length::Fill)
                .height(Length::Fill)
                .into(),
        };

        column![
            header,
            self.stories_strip(),
            row![self.sidebar(), main].spacing(20).height(Length::Fill),
        ]
        .spacing(10)
        .padding(10)
        .into()
    }

    fn stories_strip(&self) -> Element<AppMessage> {
        let authors: Vec<Element<AppMessage>> = self
            .stories
            .authors()
            .map(|group| {
                let name = group.author.display_name();
                let ring = match self.stories.ring(group.author.id) {
                    Ring::Unviewed => ACCENT,
                    Ring::Viewed | Ring::None => MUTED,
                };
                let face = container(self.avatar(name, group.author.avatar_url.as_deref(), 44.0))
                    .padding(3)
                    .style(move |_theme: &Theme| container::Appearance {
                        border: Border {
                            color: ring,
                            width: 2.0,
                            radius: 26.0.into(),
                        },
                        ..Default::default()
                    });
                button(column![face, text(name).size(12)].align_items(Alignment::Center).spacing(4))
                    .on_press(AppMessage::OpenStory(group.author.id))
                    .style(theme::Button::Text)
                    .into()
            })
            .collect();
        if authors.is_empty() {
            return text("No stories yet").size(12).style(MUTED).into();
        }
        scrollable(row(authors).spacing(10))
            .direction(scrollable::Direction::Horizontal(scrollable::Properties::default()))
            .into()
    }

    fn sidebar(&self) -> Element<AppMessage> {
        let wall = Utc::now();
        let rows: Vec<InboxRow> = self.inbox.search(&self.search, self.now, wall);
        let list: Vec<Element<AppMessage>> = rows
            .into_iter()
            .map(|r| {
                let dot = if r.online { ACCENT } else { MUTED };
                let mut line = row![
                    self.avatar(&r.name, r.avatar_url.as_deref(), 36.0),
                    column![
                        row![text("●").size(10).style(dot), text(r.name.clone()).size(16)].spacing(6),
                        text(r.status.clone()).size(12).style(MUTED),
                    ]
                    .spacing(2),
                    Space::with_width(Length::Fill),
                ]
                .spacing(10)
                .align_items(Alignment::Center);
                if let Some(badge) = r.badge {
                    line = line.push(
                        container(text(badge).size(12))
                            .padding([2, 8])
                            .style(|_theme: &Theme| container::Appearance {
                                text_color: Some(Color::WHITE),
                                background: Some(Background::Color(DANGER)),
                                border: Border {
                                    radius: 10.0.into(),
                                    ..Default::default()
                                },
                                ..Default::default()
                            }),
                    );
                }
                let style = if self.peer() == Some(r.id) {
                    theme::Button::Primary
                } else {
                    theme::Button::Text
                };
                button(line)
                    .on_press(AppMessage::OpenConversation(r.id))
                    .padding(5)
                    .width(Length::Fill)
                    .style(style)
                    .into()
            })
            .collect();

        let body: Element<AppMessage> = if list.is_empty() {
            text(if self.inbox.is_empty() { "No users yet" } else { "No matches" })
                .size(14)
                .style(MUTED)
                .into()
        } else {
            scrollable(column(list).spacing(5)).height(Length::Fill).into()
        };

        column![input("Search", &self.search, Field::Search), body]
            .spacing(10)
            .width(Length::Fixed(280.0))
            .into()
    }

    fn conversation_view(&self) -> Element<AppMessage> {
        let Some(conversation) = &self.conversation else {
            return Space::with_width(Length::Fill).into();
        };
        let peer = conversation.peer();
        let wall = Utc::now();
        let (name, avatar_url, status) = match self.inbox.profile(peer) {
            Some(p) => (
                p.display_name().to_string(),
                p.avatar_url.clone(),
                crate::inbox::presence_line(p, wall),
            ),
            None => ("User".to_string(), None, String::new()),
        };
        let status = if conversation.peer_is_typing(self.now) {
            "Typing…".to_string()
        } else {
            status
        };
        let header = row![
            button("Back").on_press(AppMessage::BackToInbox).style(theme::Button::Secondary),
            self.avatar(&name, avatar_url.as_deref(), 36.0),
            column![text(&name).size(20), text(status).size(12).style(MUTED)],
        ]
        .spacing(10)
        .align_items(Alignment::Center);

        let mut thread = Column::new().spacing(8).padding(10).width(Length::Fill);
        for item in conversation.items() {
            thread = thread.push(self.bubble(item));
        }
        if let Some(status) = conversation.delivery_status() {
            thread = thread.push(
                text(status.label())
                    .size(12)
                    .style(MUTED)
                    .width(Length::Fill)
                    .horizontal_alignment(Horizontal::Right),
            );
        }
        let messages = scrollable(thread).id(self.scroll_id.clone()).height(Length::Fill);

        let mut footer = Column::new().spacing(8);
        if let Some(target) = conversation.reply_target() {
            footer = footer.push(
                row![
                    text(format!("Replying to: {}", crate::conversation::reply_snippet(target)))
                        .size(14)
                        .style(MUTED),
                    Space::with_width(Length::Fill),
                    button("Cancel").on_press(AppMessage::CancelReply).style(theme::Button::Text),
                ]
                .align_items(Alignment::Center),
            );
        }
        if let Some((_, _, typed)) = &self.editing {
            footer = footer.push(
                row![
                    input("Edit message", typed, Field::Edit)
                        .on_submit(AppMessage::SaveEdit)
                        .width(Length::Fill),
                    button("Save").on_press(AppMessage::SaveEdit).style(theme::Button::Primary),
                    button("Cancel").on_press(AppMessage::CancelEdit).style(theme::Button::Secondary),
                ]
                .spacing(10),
            );
        }
        if self.confirm_delete.is_some() {
            footer = footer.push(
                row![
                    text("Delete this message for everyone?").size(14),
                    Space::with_width(Length::Fill),
                    button("Delete").on_press(AppMessage::ConfirmDelete).style(theme::Button::Destructive),
                    button("Keep").on_press(AppMessage::CancelDelete).style(theme::Button::Secondary),
                ]
                .spacing(10)
                .align_items(Alignment::Center),
            );
        }
        footer = footer
            .push(
                row![
                    text_input("Message", &self.composer)
                        .on_input(AppMessage::Composer)
                        .on_submit(AppMessage::Send)
                        .padding(10)
                        .width(Length::Fill),
                    button("Send").on_press(AppMessage::Send).padding(10).style(theme::Button::Primary),
                    button(GifKind::Gifs.label())
                        .on_press(AppMessage::OpenGifs(GifKind::Gifs))
                        .padding(10)
                        .style(theme::Button::Secondary),
                    button(GifKind::Stickers.label())
                        .on_press(AppMessage::OpenGifs(GifKind::Stickers))
                        .padding(10)
                        .style(theme::Button::Secondary),
                ]
                .spacing(10),
            )
            .push(
                row![
                    input("Image path", &self.image_path, Field::ImagePath)
                        .on_submit(AppMessage::AttachImage)
                        .width(Length::Fill),
                    button("Attach image").on_press(AppMessage::AttachImage).padding(10),
                ]
                .spacing(10),
            );

        column![header, messages, footer]
            .spacing(10)
            .width(Length::Fill)
            .into()
    }

    fn bubble(&self, item: MessageItem) -> Element<AppMessage> {
        let mut content = Column::new().spacing(4);
        if let Some(reply) = &item.reply {
            let mut quote = row![].spacing(6).align_items(Alignment::Center);
            if let Some(thumb) = &reply.thumbnail {
                quote = quote.push(self.picture(thumb, 32.0));
            }
            quote = quote.push(text(&reply.snippet).size(12).style(MUTED));
            content = content.push(
                container(quote)
                    .padding(4)
                    .style(|_theme: &Theme| container::Appearance {
                        background: Some(Background::Color(Color::from_rgba(0.0, 0.0, 0.0, 0.08))),
                        border: Border {
                            radius: 4.0.into(),
                            ..Default::default()
                        },
                        ..Default::default()
                    }),
            );
        }
        content = match &item.body {
            Body::Deleted => content.push(text(crate::conversation::DELETED_TEXT).size(14).style(MUTED)),
            Body::Text(t) => content.push(text(t).size(16)),
            Body::Image(url) => content.push(self.picture(url, 220.0)),
            Body::TikTok(url) => content.push(column![text("TikTok").size(12).style(MUTED), text(url).size(14)]),
            Body::Uploading(name) => content.push(text(format!("Uploading {}…", name)).size(14).style(MUTED)),
        };
        content = content.push(text(message_time(item.time, item.edited)).size(11).style(MUTED));

        let mine = item.mine;
        let bubble = container(content)
            .padding(10)
            .max_width(420)
            .style(move |_theme: &Theme| container::Appearance {
                background: Some(Background::Color(if mine {
                    Color::from_rgba(0.2, 0.6, 1.0, 0.25)
                } else {
                    Color::from_rgba(0.5, 0.5, 0.5, 0.15)
                })),
                border: Border {
                    color: Color::from_rgb(0.7, 0.7, 0.7),
                    width: 1.0,
                    radius: 8.0.into(),
                },
                ..Default::default()
            });

        let mut stack = Column::new().spacing(4);
        stack = match item.id {
            Some(id) if item.body != Body::Deleted => stack.push(
                button(bubble)
                    .on_press(AppMessage::Select(id))
                    .padding(0)
                    .style(theme::Button::Text),
            ),
            _ => stack.push(bubble),
        };
        if let Some(id) = item.id.filter(|id| self.selected == Some(*id)) {
            stack = stack.push(self.message_actions(id, mine));
        }

        let align = if mine { Alignment::End } else { Alignment::Start };
        stack.align_items(align).width(Length::Fill).into()
    }

    fn message_actions(&self, id: uuid::Uuid, mine: bool) -> Element<AppMessage> {
        let Some(conversation) = &self.conversation else {
            return Space::with_width(Length::Shrink).into();
        };
        let mut actions = row![button("Reply").on_press(AppMessage::ReplyTo(id)).style(theme::Button::Secondary)]
            .spacing(6);
        if mine && conversation.can_edit(id, self.edit_policy, Utc::now()) {
            actions = actions.push(button("Edit").on_press(AppMessage::StartEdit(id)).style(theme::Button::Secondary));
        }
        if conversation.can_delete_for_everyone(id) {
            actions = actions.push(
                button("Delete for everyone")
                    .on_press(AppMessage::AskDelete(id))
                    .style(theme::Button::Destructive),
            );
        }
        actions
            .push(button("Delete for me").on_press(AppMessage::HideForMe(id)).style(theme::Button::Secondary))
            .into()
    }

    fn gif_view(&self) -> Element<AppMessage> {
        let Some(picker) = &self.gifs else {
            return text("Loading…").into();
        };
        let tab = |kind: GifKind| {
            button(kind.label())
                .on_press(AppMessage::OpenGifs(kind))
                .style(if picker.kind == kind {
                    theme::Button::Primary
                } else {
                    theme::Button::Secondary
                })
        };
        let search = row![
            input("Search Tenor", &picker.query, Field::GifQuery)
                .on_submit(AppMessage::GifSearch)
                .width(Length::Fill),
            button("Search").on_press(AppMessage::GifSearch),
        ]
        .spacing(10);

        let grid = column(
            picker
                .tiles()
                .chunks(GIF_COLUMNS)
                .map(|chunk| {
                    row(chunk
                        .iter()
                        .map(|url| {
                            button(self.picture(url, 100.0))
                                .on_press(AppMessage::PickGif(url.clone()))
                                .padding(2)
                                .style(theme::Button::Text)
                                .into()
                        })
                        .collect::<Vec<_>>())
                    .spacing(6)
                    .into()
                })
                .collect::<Vec<_>>(),
        )
        .spacing(6);

        let mut content = column![row![tab(GifKind::Gifs), tab(GifKind::Stickers)].spacing(10), search].spacing(10);
        if let Some(notice) = picker.notice() {
            content = content.push(text(notice).style(MUTED));
        }
        content = content.push(scrollable(grid).height(Length::Fixed(360.0)));
        content = if picker.is_loading() {
            content.push(text("Loading…").size(14).style(MUTED))
        } else {
            content.push(button("Load more").on_press(AppMessage::GifMore).style(theme::Button::Secondary))
        };
        content.into()
    }

    fn story_view(&self) -> Element<AppMessage> {
        let Some((viewer, story)) = self
            .viewer
            .and_then(|v| v.current(&self.stories).map(|s| (v, s)))
        else {
            return text("This story is no longer available.").style(MUTED).into();
        };
        let author = self.stories.group(viewer.user).map(|g| &g.author);
        let name = author.map(|a| a.display_name()).unwrap_or("User");
        let total = self.stories.group(viewer.user).map_or(0, |g| g.stories.len());

        let media: Element<AppMessage> = match story.media_type {
            MediaType::Video => container(text("Video story").size(20).style(MUTED))
                .padding(40)
                .center_x()
                .width(Length::Fill)
                .into(),
            MediaType::Image | MediaType::Gif => self.picture(&story.media_url, 420.0),
        };

        let mut content = column![
            row![
                self.avatar(name, author.and_then(|a| a.avatar_url.as_deref()), 32.0),
                text(name).size(16),
                text(time_ago(story.created_at, Utc::now())).size(12).style(MUTED),
                Space::with_width(Length::Fill),
                text(format!("{}/{}", viewer.index + 1, total)).size(12).style(MUTED),
            ]
            .spacing(10)
            .align_items(Alignment::Center),
            media,
        ]
        .spacing(10);
        if let Some(caption) = &story.caption {
            content = content.push(text(caption).size(16));
        }
        content = content.push(
            row![
                button("Previous").on_press(AppMessage::StoryStep(-1)).style(theme::Button::Secondary),
                Space::with_width(Length::Fill),
                button("Next").on_press(AppMessage::StoryStep(1)).style(theme::Button::Secondary),
            ],
        );
        if self.me() != Some(viewer.user) {
            content = content.push(
                row![
                    input("Reply to story", &self.story_reply, Field::StoryReply)
                        .on_submit(AppMessage::SendStoryReply)
                        .width(Length::Fill),
                    button("Send").on_press(AppMessage::SendStoryReply).style(theme::Button::Primary),
                ]
                .spacing(10),
            );
        }
        content.into()
    }

    fn add_story_view(&self) -> Element<AppMessage> {
        let form = &self.story_form;
        let mut post = button(if form.busy { "Posting…" } else { "Post story" })
            .padding(10)
            .style(theme::Button::Primary);
        if !form.busy {
            post = post.on_press(AppMessage::PostStory);
        }
        column![
            text("Image or video, up to 20 MB. Stories disappear after 24 hours.")
                .size(14)
                .style(MUTED),
            input("File path", &form.path, Field::StoryPath),
            input("Caption (optional)", &form.caption, Field::StoryCaption),
            post,
        ]
        .spacing(10)
        .into()
    }

    fn profile_view(&self) -> Element<AppMessage> {
        let form = &self.profile_form;
        let (name, avatar) = match &self.account {
            Some(a) => (a.profile.display_name(), a.profile.avatar_url.as_deref()),
            None => ("Me", None),
        };
        let remove_label = if form.remove_avatar {
            "Avatar will be removed (undo)"
        } else {
            "Remove avatar"
        };
        let mut save = button(if form.busy { "Saving…" } else { "Save" })
            .padding(10)
            .style(theme::Button::Primary);
        if !form.busy {
            save = save.on_press(AppMessage::SaveProfile);
        }
        column![
            row![self.avatar(name, avatar, 64.0), text(name).size(20)]
                .spacing(10)
                .align_items(Alignment::Center),
            input("Username", &form.username, Field::ProfileName),
            input("New avatar path (image, up to 3 MB)", &form.avatar_path, Field::AvatarPath),
            button(remove_label)
                .on_press(AppMessage::ToggleRemoveAvatar)
                .style(theme::Button::Secondary),
            save,
        ]
        .spacing(10)
        .into()
    }
}
