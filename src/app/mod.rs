//! The desktop client: a working calculator that unlocks into the messenger.

mod files;
mod view;

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use chrono::Utc;
use iced::widget::{image, scrollable};
use iced::{Application, Command, Subscription, Theme};
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::calculator::{Calculator, Key, KeyOutcome};
use crate::conversation::{validate_chat_image, Applied, Conversation, EditPolicy};
use crate::error::ClientError;
use crate::inbox::Inbox;
use crate::messenger::{Account, Messenger, SignUpForm, SignUpOutcome};
use crate::models::{LocalFile, Message, MessageKind, Profile};
use crate::profile::AvatarChange;
use crate::realtime::{
    self, ChangeKind, ChannelConfig, RealtimeEvent, RealtimeHandle, INBOX_CHANNEL,
    STORIES_CHANNEL, TYPING_CHANNEL,
};
use crate::stories::{Step, StoryFeed, StoryViewer};
use crate::tenor::{GifKind, GifPicker, PageRequest, TenorClient, TenorPage};
use crate::typing::{TypingEmitter, TypingSignal, TYPING_EVENT};

pub use files::read_local_file;

const TOAST_TTL: Duration = Duration::from_secs(4);
const TICK: Duration = Duration::from_millis(500);
const TOKEN_PUSH_EVERY: Duration = Duration::from_secs(10 * 60);

/// Error as carried by UI messages, which must be `Clone`.
#[derive(Debug, Clone)]
pub struct Failure {
    pub title: &'static str,
    pub message: String,
}

impl From<ClientError> for Failure {
    fn from(e: ClientError) -> Self {
        Failure {
            title: e.title(),
            message: e.to_string(),
        }
    }
}

pub type Outcome<T> = std::result::Result<T, Failure>;

fn outcome<T>(result: crate::error::Result<T>) -> Outcome<T> {
    result.map_err(Failure::from)
}

pub struct Flags {
    pub messenger: Messenger,
    pub tenor: TenorClient,
    pub realtime_url: String,
    pub http: reqwest::Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Calculator,
    Chat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overlay {
    Auth,
    Passcode,
    Gifs,
    Story,
    AddStory,
    Profile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    #[default]
    SignIn,
    SignUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastKind {
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct Toast {
    id: u64,
    kind: ToastKind,
    title: String,
    body: String,
}

#[derive(Debug, Clone)]
pub enum Field {
    Email,
    Username,
    Password,
    SignupPasscode,
    SignupPasscodeConfirm,
    Passcode,
    PasscodeConfirm,
    Search,
    ImagePath,
    StoryPath,
    StoryCaption,
    StoryReply,
    ProfileName,
    AvatarPath,
    GifQuery,
    Edit,
}

#[derive(Default)]
struct AuthForm {
    mode: AuthMode,
    email: String,
    username: String,
    password: String,
    passcode: String,
    passcode_confirm: String,
    busy: bool,
    error: Option<String>,
}

#[derive(Default)]
struct PasscodeForm {
    first: String,
    second: String,
    busy: bool,
    error: Option<String>,
}

#[derive(Default)]
struct StoryForm {
    path: String,
    caption: String,
    busy: bool,
}

#[derive(Default)]
struct ProfileForm {
    username: String,
    avatar_path: String,
    remove_avatar: bool,
    busy: bool,
}

#[derive(Debug, Clone)]
pub enum AppMessage {
    Input(Field, String),
    Key(Key),
    Unlocked(Outcome<bool>),
    Restored(Outcome<Option<Account>>),

    OpenOverlay(Overlay),
    CloseOverlay,
    AuthMode(AuthMode),
    SignIn,
    SignUp,
    SignedIn(Outcome<Account>),
    SignedUp(Outcome<SignUpOutcome>),
    SavePasscode,
    PasscodeSaved(Outcome<Profile>),
    SignOut,
    SignedOut(Outcome<()>),
    PresenceSet(Outcome<()>),

    InboxLoaded(Outcome<Inbox>),
    OpenConversation(Uuid),
    ConversationLoaded(Uuid, Outcome<Conversation>),
    BackToInbox,
    Composer(String),
    Send,
    Sent(Outcome<Vec<Message>>),
    Select(Uuid),
    ReplyTo(Uuid),
    CancelReply,
    StartEdit(Uuid),
    SaveEdit,
    CancelEdit,
    Edited(Outcome<Option<Vec<Message>>>),
    AskDelete(Uuid),
    ConfirmDelete,
    CancelDelete,
    Deleted(Outcome<Vec<Message>>),
    HideForMe(Uuid),
    AttachImage,
    ImageRead(Outcome<LocalFile>),
    /// Peer of the conversation the upload started in, and its temporary id.
    ImageUploaded(Uuid, u64, Outcome<Vec<Message>>),
    ReplyBases(Vec<Message>),
    UnreadRefreshed(Uuid, Outcome<u64>),
    Acknowledged(Outcome<()>),

    OpenGifs(GifKind),
    GifSearch,
    GifMore,
    GifPage(PageRequest, Outcome<TenorPage>),
    PickGif(String),

    StoriesLoaded(Outcome<StoryFeed>),
    OpenStory(Uuid),
    StoryStep(isize),
    StoryViewed(Outcome<()>),
    SendStoryReply,
    StoryReplied(Uuid, Outcome<Vec<Message>>),
    PostStory,
    StoryPosted(Outcome<()>),

    ToggleRemoveAvatar,
    SaveProfile,
    ProfileSaved(Outcome<Profile>),

    RealtimeReady(RealtimeHandle),
    Realtime(RealtimeEvent),
    RealtimeSent(Outcome<()>),

    ImageFetched(String, Outcome<Vec<u8>>),
    Tick(Instant),
    DismissToast(u64),
    ToggleTheme,
}

pub struct App {
    messenger: Messenger,
    tenor: TenorClient,
    http: reqwest::Client,
    realtime_url: String,
    realtime: Option<RealtimeHandle>,
    dm_channel: Option<String>,
    token_pushed: Instant,

    screen: Screen,
    overlay: Option<Overlay>,
    dark: bool,
    now: Instant,
    toasts: Vec<Toast>,
    next_toast: u64,

    calculator: Calculator,
    account: Option<Account>,
    auth: AuthForm,
    passcode: PasscodeForm,

    inbox: Inbox,
    search: String,
    opening: Option<Uuid>,
    conversation: Option<Conversation>,
    composer: String,
    typing: TypingEmitter,
    selected: Option<Uuid>,
    editing: Option<(Uuid, String, String)>,
    confirm_delete: Option<Uuid>,
    image_path: String,
    edit_policy: EditPolicy,
    scroll_id: scrollable::Id,

    gifs: Option<GifPicker>,

    stories: StoryFeed,
    viewer: Option<StoryViewer>,
    story_reply: String,
    story_form: StoryForm,
    profile_form: ProfileForm,

    images: HashMap<String, image::Handle>,
    requested_images: HashSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Receipt {
    Delivered,
    Seen,
}

/// What a realtime row addressed to me should be marked as.
fn receipt_for(me: Uuid, open_peer: Option<Uuid>, kind: ChangeKind, message: &Message) -> Option<Receipt> {
    if kind != ChangeKind::Insert || message.receiver_id != me || message.sender_id == me {
        return None;
    }
    if open_peer == Some(message.sender_id) {
        Some(Receipt::Seen)
    } else {
        Some(Receipt::Delivered)
    }
}

/// Owns the realtime worker for as long as the subscription lives.
enum RealtimeWorker {
    Starting(String),
    Running(mpsc::Receiver<RealtimeEvent>),
}

impl Application for App {
    type Executor = iced::executor::Default;
    type Message = AppMessage;
    type Theme = Theme;
    type Flags = Flags;

    fn new(flags: Flags) -> (Self, Command<AppMessage>) {
        let dark = flags.messenger.theme().as_deref() == Some("dark");
        let messenger = flags.messenger.clone();
        (
            App {
                messenger: flags.messenger,
                tenor: flags.tenor,
                http: flags.http,
                realtime_url: flags.realtime_url,
                realtime: None,
                dm_channel: None,
                token_pushed: Instant::now(),
                screen: Screen::Calculator,
                overlay: None,
                dark,
                now: Instant::now(),
                toasts: Vec::new(),
                next_toast: 0,
                calculator: Calculator::new(),
                account: None,
                auth: AuthForm::default(),
                passcode: PasscodeForm::default(),
                inbox: Inbox::default(),
                search: String::new(),
                opening: None,
                conversation: None,
                composer: String::new(),
                typing: TypingEmitter::new(),
                selected: None,
                editing: None,
                confirm_delete: None,
                image_path: String::new(),
                edit_policy: EditPolicy::default(),
                scroll_id: scrollable::Id::new("messages"),
                gifs: None,
                stories: StoryFeed::default(),
                viewer: None,
                story_reply: String::new(),
                story_form: StoryForm::default(),
                profile_form: ProfileForm::default(),
                images: HashMap::new(),
                requested_images: HashSet::new(),
            },
            Command::perform(async move { outcome(messenger.restore().await) }, AppMessage::Restored),
        )
    }

    fn title(&self) -> String {
        match self.screen {
            Screen::Calculator => String::from("Calculator"),
            Screen::Chat => String::from("CalcChat"),
        }
    }

    fn theme(&self) -> Theme {
        if self.dark {
            Theme::Dark
        } else {
            Theme::Light
        }
    }

    fn update(&mut self, message: AppMessage) -> Command<AppMessage> {
        let command = self.handle(message);
        Command::batch([command, self.fetch_images()])
    }

    fn view(&self) -> iced::Element<AppMessage> {
        self.render()
    }

    fn subscription(&self) -> Subscription<AppMessage> {
        let tick = iced::time::every(TICK).map(AppMessage::Tick);
        let Some(me) = self.me() else {
            return tick;
        };

        let url = self.realtime_url.clone();
        let realtime = iced::subscription::unfold(
            (std::any::TypeId::of::<RealtimeWorker>(), me),
            RealtimeWorker::Starting(url),
            |state| async move {
                match state {
                    RealtimeWorker::Starting(url) => {
                        let (handle, events) = realtime::spawn(url);
                        (AppMessage::RealtimeReady(handle), RealtimeWorker::Running(events))
                    }
                    RealtimeWorker::Running(mut events) => match events.recv().await {
                        Some(event) => (AppMessage::Realtime(event), RealtimeWorker::Running(events)),
                        None => std::future::pending().await,
                    },
                }
            },
        );
        Subscription::batch([tick, realtime])
    }
}

impl App {
    fn me(&self) -> Option<Uuid> {
        self.account.as_ref().map(Account::id)
    }

    fn peer(&self) -> Option<Uuid> {
        self.conversation.as_ref().map(Conversation::peer)
    }

    fn toast(&mut self, kind: ToastKind, title: &str, body: &str) -> Command<AppMessage> {
        self.next_toast += 1;
        let id = self.next_toast;
        self.toasts.push(Toast {
            id,
            kind,
            title: title.to_string(),
            body: body.to_string(),
        });
        Command::perform(
            async move { tokio::time::sleep(TOAST_TTL).await },
            move |_| AppMessage::DismissToast(id),
        )
    }

    fn fail(&mut self, context: &str, failure: Failure) -> Command<AppMessage> {
        error!("{}: {}", context, failure.message);
        self.toast(ToastKind::Error, failure.title, &failure.message)
    }

    fn snap_to_bottom(&self) -> Command<AppMessage> {
        scrollable::snap_to(self.scroll_id.clone(), scrollable::RelativeOffset { x: 0.0, y: 1.0 })
    }

    fn handle(&mut self, message: AppMessage) -> Command<AppMessage> {
        match message {
            AppMessage::Input(field, value) => {
                self.set_field(field, value);
                Command::none()
            }
            AppMessage::Tick(now) => {
                self.now = now;
                self.push_token(now)
            }
            AppMessage::DismissToast(id) => {
                self.toasts.retain(|t| t.id != id);
                Command::none()
            }
            AppMessage::ToggleTheme => {
                self.dark = !self.dark;
                if let Err(e) = self.messenger.set_theme(if self.dark { "dark" } else { "light" }) {
                    warn!("Theme not saved: {}", e);
                }
                Command::none()
            }
            AppMessage::OpenOverlay(overlay) => self.open_overlay(overlay),
            AppMessage::CloseOverlay => {
                self.overlay = None;
                self.viewer = None;
                self.gifs = None;
                Command::none()
            }

            AppMessage::Key(key) => match self.calculator.press(key, self.account.is_some()) {
                KeyOutcome::VerifyPasscode(code) => {
                    let messenger = self.messenger.clone();
                    Command::perform(async move { outcome(messenger.unlock(code).await) }, AppMessage::Unlocked)
                }
                KeyOutcome::Updated | KeyOutcome::Ignored => Command::none(),
            },
            AppMessage::Unlocked(Ok(true)) => {
                self.calculator.unlocked();
                self.enter_chat()
            }
            AppMessage::Unlocked(Ok(false)) => {
                self.toast(ToastKind::Error, "Wrong passcode", "Try again.")
            }
            AppMessage::Unlocked(Err(failure)) => self.fail("Unlock failed", failure),
            AppMessage::Restored(Ok(Some(account))) => {
                info!("Restored session for {}", account.id());
                self.signed_in(account)
            }
            AppMessage::Restored(Ok(None)) => Command::none(),
            AppMessage::Restored(Err(failure)) => {
                warn!("Session restore failed: {}", failure.message);
                Command::none()
            }

            AppMessage::AuthMode(mode) => {
                self.auth.mode = mode;
                self.auth.error = None;
                Command::none()
            }
            AppMessage::SignIn => {
                self.auth.busy = true;
                self.auth.error = None;
                let messenger = self.messenger.clone();
                let email = self.auth.email.clone();
                let password = self.auth.password.clone();
                Command::perform(
                    async move { outcome(messenger.sign_in(&email, &password).await) },
                    AppMessage::SignedIn,
                )
            }
            AppMessage::SignUp => {
                self.auth.busy = true;
                self.auth.error = None;
                let messenger = self.messenger.clone();
                let form = SignUpForm {
                    email: self.auth.email.clone(),
                    username: self.auth.username.clone(),
                    password: self.auth.password.clone(),
                    passcode: self.auth.passcode.clone(),
                    passcode_confirm: self.auth.passcode_confirm.clone(),
                };
                Command::perform(async move { outcome(messenger.sign_up(form).await) }, AppMessage::SignedUp)
            }
            AppMessage::SignedIn(result) => {
                self.auth.busy = false;
                match result {
                    Ok(account) => {
                        self.auth = AuthForm::default();
                        let welcome = self.toast(ToastKind::Success, "Signed in", "Welcome back.");
                        Command::batch([welcome, self.signed_in(account)])
                    }
                    Err(failure) => {
                        self.auth.error = Some(failure.message.clone());
                        self.fail("Sign in failed", failure)
                    }
                }
            }
            AppMessage::SignedUp(result) => {
                self.auth.busy = false;
                match result {
                    Ok(SignUpOutcome::SignedIn(account)) => {
                        self.auth = AuthForm::default();
                        let created = self.toast(ToastKind::Success, "Account created", "You are signed in.");
                        Command::batch([created, self.signed_in(account)])
                    }
                    Ok(SignUpOutcome::ConfirmEmail) => {
                        self.auth.mode = AuthMode::SignIn;
                        self.toast(
                            ToastKind::Success,
                            "Account created",
                            "Now sign in with your credentials.",
                        )
                    }
                    Err(failure) => {
                        self.auth.error = Some(failure.message.clone());
                        self.fail("Sign up failed", failure)
                    }
                }
            }
            AppMessage::SavePasscode => {
                let Some(me) = self.me() else {
                    return self.fail("Passcode", ClientError::NotSignedIn.into());
                };
                self.passcode.busy = true;
                self.passcode.error = None;
                let messenger = self.messenger.clone();
                let (first, second) = (self.passcode.first.clone(), self.passcode.second.clone());
                Command::perform(
                    async move { outcome(messenger.set_passcode(me, first, second).await) },
                    AppMessage::PasscodeSaved,
                )
            }
            AppMessage::PasscodeSaved(result) => {
                self.passcode.busy = false;
                match result {
                    Ok(profile) => {
                        if let Some(account) = self.account.as_mut() {
                            account.needs_passcode = !profile.has_passcode();
                            account.profile = profile;
                        }
                        self.passcode = PasscodeForm::default();
                        self.overlay = None;
                        self.screen = Screen::Calculator;
                        self.toast(
                            ToastKind::Success,
                            "Passcode saved",
                            "Use the calculator and press = to unlock.",
                        )
                    }
                    Err(failure) => {
                        self.passcode.error = Some(failure.message);
                        Command::none()
                    }
                }
            }
            AppMessage::SignOut => {
                let Some(me) = self.me() else {
                    return Command::none();
                };
                let messenger = self.messenger.clone();
                Command::perform(async move { outcome(messenger.sign_out(me).await) }, AppMessage::SignedOut)
            }
            AppMessage::SignedOut(result) => {
                if let Err(failure) = result {
                    warn!("Sign out reported: {}", failure.message);
                }
                self.reset_session();
                self.toast(ToastKind::Success, "Signed out", "You have been logged out.")
            }
            AppMessage::PresenceSet(result) => {
                if let Err(failure) = result {
                    warn!("Presence update failed: {}", failure.message);
                }
                Command::none()
            }

            AppMessage::InboxLoaded(Ok(inbox)) => {
                self.inbox = inbox;
                Command::none()
            }
            AppMessage::InboxLoaded(Err(failure)) => self.fail("Loading users failed", failure),
            AppMessage::OpenConversation(peer) => self.open_conversation(peer),
            AppMessage::ConversationLoaded(peer, result) => {
                if self.opening != Some(peer) {
                    return Command::none();
                }
                self.opening = None;
                match result {
                    Ok(conversation) => {
                        self.conversation = Some(conversation);
                        self.inbox.set_unread(peer, 0);
                        Command::batch([self.switch_dm_channel(peer), self.snap_to_bottom()])
                    }
                    Err(failure) => self.fail("Opening the conversation failed", failure),
                }
            }
            AppMessage::BackToInbox => {
                let notice = self.leaving_conversation();
                self.conversation = None;
                self.opening = None;
                self.selected = None;
                self.editing = None;
                self.typing.reset();
                Command::batch([notice, self.leave_dm_channel()])
            }
            AppMessage::Composer(text) => {
                self.composer = text;
                self.emit_typing()
            }
            AppMessage::Send => {
                let Some(me) = self.me() else {
                    return Command::none();
                };
                let text = std::mem::take(&mut self.composer);
                self.typing.reset();
                let reply_to = self.conversation.as_ref().and_then(Conversation::reply_target_id);
                let peer = self.peer();
                let messenger = self.messenger.clone();
                Command::perform(
                    async move { outcome(messenger.send_text(me, peer, text, reply_to).await) },
                    AppMessage::Sent,
                )
            }
            AppMessage::Sent(Ok(rows)) => {
                if rows.is_empty() {
                    return Command::none();
                }
                self.apply_rows(rows);
                if let Some(conversation) = self.conversation.as_mut() {
                    conversation.clear_reply_target();
                }
                self.snap_to_bottom()
            }
            AppMessage::Sent(Err(failure)) => self.fail("Send failed", failure),
            AppMessage::Select(id) => {
                self.selected = if self.selected == Some(id) { None } else { Some(id) };
                Command::none()
            }
            AppMessage::ReplyTo(id) => {
                if let Some(conversation) = self.conversation.as_mut() {
                    conversation.set_reply_target(id);
                }
                self.selected = None;
                Command::none()
            }
            AppMessage::CancelReply => {
                if let Some(conversation) = self.conversation.as_mut() {
                    conversation.clear_reply_target();
                }
                Command::none()
            }
            AppMessage::StartEdit(id) => {
                let editable = self
                    .conversation
                    .as_ref()
                    .filter(|c| c.can_edit(id, self.edit_policy, Utc::now()))
                    .and_then(|c| c.get(id))
                    .map(|m| m.content.clone());
                match editable {
                    Some(content) => {
                        self.editing = Some((id, content.clone(), content));
                        self.selected = None;
                        Command::none()
                    }
                    None => self.toast(ToastKind::Warning, "Cannot edit", "This message can no longer be edited."),
                }
            }
            AppMessage::SaveEdit => {
                let (Some(me), Some((id, original, typed))) = (self.me(), self.editing.take()) else {
                    return Command::none();
                };
                let messenger = self.messenger.clone();
                Command::perform(
                    async move { outcome(messenger.edit(me, id, original, typed).await) },
                    AppMessage::Edited,
                )
            }
            AppMessage::CancelEdit => {
                self.editing = None;
                Command::none()
            }
            AppMessage::Edited(Ok(Some(rows))) => {
                self.apply_rows(rows);
                Command::none()
            }
            AppMessage::Edited(Ok(None)) => Command::none(),
            AppMessage::Edited(Err(failure)) => self.fail("Edit failed", failure),
            AppMessage::AskDelete(id) => {
                self.confirm_delete = Some(id);
                self.selected = None;
                Command::none()
            }
            AppMessage::CancelDelete => {
                self.confirm_delete = None;
                Command::none()
            }
            AppMessage::ConfirmDelete => {
                let (Some(me), Some(id)) = (self.me(), self.confirm_delete.take()) else {
                    return Command::none();
                };
                let messenger = self.messenger.clone();
                Command::perform(
                    async move { outcome(messenger.delete_for_everyone(me, id).await) },
                    AppMessage::Deleted,
                )
            }
            AppMessage::Deleted(Ok(rows)) => {
                self.apply_rows(rows);
                Command::none()
            }
            AppMessage::Deleted(Err(failure)) => self.fail("Delete failed", failure),
            AppMessage::HideForMe(id) => {
                let (Some(me), Some(peer)) = (self.me(), self.peer()) else {
                    return Command::none();
                };
                self.selected = None;
                if let Some(conversation) = self.conversation.as_mut() {
                    conversation.hide(id);
                }
                match self.messenger.delete_for_me(me, peer, id) {
                    Ok(()) => Command::none(),
                    Err(e) => self.fail("Delete for me failed", e.into()),
                }
            }
            AppMessage::AttachImage => {
                let path = std::mem::take(&mut self.image_path);
                Command::perform(async move { outcome(read_local_file(&path).await) }, AppMessage::ImageRead)
            }
            AppMessage::ImageRead(Ok(file)) => self.upload_image(file),
            AppMessage::ImageRead(Err(failure)) => self.fail("Reading the image failed", failure),
            AppMessage::ImageUploaded(peer, temp_id, result) => {
                // Temporary ids are per conversation; another open thread must not see them.
                let conversation = self.conversation.as_mut().filter(|c| c.peer() == peer);
                match result {
                    Ok(rows) => {
                        for row in &rows {
                            self.inbox.apply_message(row);
                        }
                        match conversation {
                            Some(conversation) => {
                                conversation.finish_upload(temp_id, rows);
                                self.snap_to_bottom()
                            }
                            None => Command::none(),
                        }
                    }
                    Err(failure) => {
                        if let Some(conversation) = conversation {
                            conversation.fail_upload(temp_id);
                        }
                        self.fail("Upload failed", failure)
                    }
                }
            }
            AppMessage::ReplyBases(bases) => {
                if let Some(conversation) = self.conversation.as_mut() {
                    for base in bases {
                        conversation.remember(base);
                    }
                }
                Command::none()
            }
            AppMessage::UnreadRefreshed(peer, result) => {
                match result {
                    // The open thread is read as it arrives.
                    Ok(_) if self.peer() == Some(peer) => self.inbox.set_unread(peer, 0),
                    Ok(count) => self.inbox.set_unread(peer, count),
                    Err(failure) => warn!("Unread refresh for {} failed: {}", peer, failure.message),
                }
                Command::none()
            }
            AppMessage::Acknowledged(result) => {
                if let Err(failure) = result {
                    warn!("Delivery receipt failed: {}", failure.message);
                }
                Command::none()
            }

            AppMessage::OpenGifs(kind) => {
                if self.peer().is_none() {
                    return self.fail("GIFs", ClientError::NoChatSelected.into());
                }
                if !self.tenor.is_configured() {
                    return self.toast(ToastKind::Warning, "GIFs unavailable", "Set TENOR_API_KEY to search GIFs.");
                }
                let request = match self.gifs.as_mut() {
                    Some(picker) => picker.set_kind(kind),
                    None => {
                        let (picker, request) = GifPicker::open(kind);
                        self.gifs = Some(picker);
                        request
                    }
                };
                self.overlay = Some(Overlay::Gifs);
                self.fetch_gifs(request)
            }
            AppMessage::GifSearch => match self.gifs.as_mut() {
                Some(picker) => {
                    let request = picker.reload();
                    self.fetch_gifs(request)
                }
                None => Command::none(),
            },
            AppMessage::GifMore => match self.gifs.as_mut().and_then(GifPicker::load_more) {
                Some(request) => self.fetch_gifs(request),
                None => Command::none(),
            },
            AppMessage::GifPage(request, page) => {
                let Some(picker) = self.gifs.as_mut() else {
                    return Command::none();
                };
                match picker.on_page(&request, page) {
                    Ok(()) => Command::none(),
                    Err(failure) => self.fail("Tenor request failed", failure),
                }
            }
            AppMessage::PickGif(url) => {
                let Some(me) = self.me() else {
                    return Command::none();
                };
                let kind = self
                    .gifs
                    .as_ref()
                    .map_or(MessageKind::Gif, |p| p.kind.message_kind());
                self.gifs = None;
                self.overlay = None;
                let peer = self.peer();
                let reply_to = self.conversation.as_ref().and_then(Conversation::reply_target_id);
                let messenger = self.messenger.clone();
                Command::perform(
                    async move { outcome(messenger.send_gif(me, peer, url, kind, reply_to).await) },
                    AppMessage::Sent,
                )
            }

            AppMessage::StoriesLoaded(Ok(feed)) => {
                self.stories = feed;
                Command::none()
            }
            AppMessage::StoriesLoaded(Err(failure)) => {
                warn!("Stories failed to load: {}", failure.message);
                Command::none()
            }
            AppMessage::OpenStory(user) => match StoryViewer::open(&self.stories, user, None) {
                Some((viewer, story)) => {
                    self.viewer = Some(viewer);
                    self.overlay = Some(Overlay::Story);
                    self.story_reply.clear();
                    self.view_story(story.id)
                }
                None => Command::none(),
            },
            AppMessage::StoryStep(delta) => {
                let Some(viewer) = self.viewer.as_mut() else {
                    return Command::none();
                };
                match viewer.step(&self.stories, delta) {
                    Step::Show(story) => self.view_story(story.id),
                    Step::Close => {
                        self.viewer = None;
                        self.overlay = None;
                        Command::none()
                    }
                }
            }
            AppMessage::StoryViewed(result) => {
                if let Err(failure) = result {
                    warn!("Story view not recorded: {}", failure.message);
                }
                Command::none()
            }
            AppMessage::SendStoryReply => {
                let (Some(me), Some(viewer)) = (self.me(), self.viewer) else {
                    return Command::none();
                };
                let text = std::mem::take(&mut self.story_reply);
                let messenger = self.messenger.clone();
                let author = viewer.user;
                Command::perform(
                    async move { outcome(messenger.story_reply(me, author, text).await) },
                    move |result| AppMessage::StoryReplied(author, result),
                )
            }
            AppMessage::StoryReplied(author, Ok(rows)) => {
                if rows.is_empty() {
                    return Command::none();
                }
                for row in &rows {
                    self.inbox.apply_message(row);
                }
                self.viewer = None;
                self.overlay = None;
                self.open_conversation(author)
            }
            AppMessage::StoryReplied(_, Err(failure)) => self.fail("Reply failed", failure),
            AppMessage::PostStory => {
                let Some(me) = self.me() else {
                    return self.fail("Add story", ClientError::NotSignedIn.into());
                };
                self.story_form.busy = true;
                let path = self.story_form.path.clone();
                let caption = self.story_form.caption.clone();
                let messenger = self.messenger.clone();
                Command::perform(
                    async move {
                        let file = read_local_file(&path).await?;
                        messenger.post_story(me, file, caption).await
                    },
                    |result| AppMessage::StoryPosted(outcome(result)),
                )
            }
            AppMessage::StoryPosted(result) => {
                self.story_form.busy = false;
                match result {
                    Ok(()) => {
                        self.story_form = StoryForm::default();
                        self.overlay = None;
                        let posted = self.toast(ToastKind::Success, "Story posted", "Your story is live for 24 hours.");
                        Command::batch([posted, self.reload_stories()])
                    }
                    Err(failure) => self.fail("Post failed", failure),
                }
            }

            AppMessage::ToggleRemoveAvatar => {
                self.profile_form.remove_avatar = !self.profile_form.remove_avatar;
                Command::none()
            }
            AppMessage::SaveProfile => {
                let Some(me) = self.me() else {
                    return Command::none();
                };
                self.profile_form.busy = true;
                let username = self.profile_form.username.clone();
                let avatar_path = self.profile_form.avatar_path.trim().to_string();
                let remove = self.profile_form.remove_avatar;
                let messenger = self.messenger.clone();
                Command::perform(
                    async move {
                        let avatar = if !avatar_path.is_empty() {
                            AvatarChange::Replace(read_local_file(&avatar_path).await?)
                        } else if remove {
                            AvatarChange::Remove
                        } else {
                            AvatarChange::Keep
                        };
                        messenger.update_profile(me, username, avatar).await
                    },
                    |result| AppMessage::ProfileSaved(outcome(result)),
                )
            }
            AppMessage::ProfileSaved(result) => {
                self.profile_form.busy = false;
                match result {
                    Ok(profile) => {
                        if let Some(account) = self.account.as_mut() {
                            account.profile = profile;
                        }
                        self.overlay = None;
                        let saved = self.toast(ToastKind::Success, "Profile updated", "Your changes are saved.");
                        Command::batch([saved, self.reload_inbox()])
                    }
                    Err(failure) => self.fail("Profile update failed", failure),
                }
            }

            AppMessage::RealtimeReady(handle) => {
                debug!("Realtime worker started");
                self.realtime = Some(handle);
                if self.screen != Screen::Chat {
                    return Command::none();
                }
                let mut commands = vec![self.join_shared_channels()];
                if let Some(peer) = self.peer() {
                    self.dm_channel = None;
                    commands.push(self.switch_dm_channel(peer));
                }
                Command::batch(commands)
            }
            AppMessage::Realtime(event) => self.on_realtime(event),
            AppMessage::RealtimeSent(result) => {
                if let Err(failure) = result {
                    warn!("Realtime command failed: {}", failure.message);
                }
                Command::none()
            }

            AppMessage::ImageFetched(url, Ok(bytes)) => {
                self.images.insert(url, image::Handle::from_memory(bytes));
                Command::none()
            }
            AppMessage::ImageFetched(url, Err(failure)) => {
                debug!("Image {} not loaded: {}", url, failure.message);
                Command::none()
            }
        }
    }

    fn set_field(&mut self, field: Field, value: String) {
        match field {
            Field::Email => self.auth.email = value,
            Field::Username => self.auth.username = value,
            Field::Password => self.auth.password = value,
            Field::SignupPasscode => self.auth.passcode = value,
            Field::SignupPasscodeConfirm => self.auth.passcode_confirm = value,
            Field::Passcode => self.passcode.first = value,
            Field::PasscodeConfirm => self.passcode.second = value,
            Field::Search => self.search = value,
            Field::ImagePath => self.image_path = value,
            Field::StoryPath => self.story_form.path = value,
            Field::StoryCaption => self.story_form.caption = value,
            Field::StoryReply => self.story_reply = value,
            Field::ProfileName => self.profile_form.username = value,
            Field::AvatarPath => self.profile_form.avatar_path = value,
            Field::GifQuery => {
                if let Some(picker) = self.gifs.as_mut() {
                    picker.set_query(value);
                }
            }
            Field::Edit => {
                if let Some((_, _, typed)) = self.editing.as_mut() {
                    *typed = value;
                }
            }
        }
    }

    fn open_overlay(&mut self, overlay: Overlay) -> Command<AppMessage> {
        match overlay {
            Overlay::Passcode if self.account.is_none() => {
                return self.fail("Passcode", ClientError::NotSignedIn.into());
            }
            Overlay::Passcode => self.passcode = PasscodeForm::default(),
            Overlay::Profile => {
                let name = self
                    .account
                    .as_ref()
                    .and_then(|a| a.profile.username.clone())
                    .unwrap_or_default();
                self.profile_form = ProfileForm {
                    username: name,
                    ..ProfileForm::default()
                };
            }
            Overlay::AddStory => self.story_form = StoryForm::default(),
            _ => {}
        }
        self.overlay = Some(overlay);
        Command::none()
    }

    fn signed_in(&mut self, account: Account) -> Command<AppMessage> {
        let needs_passcode = account.needs_passcode;
        self.account = Some(account);
        self.screen = Screen::Calculator;
        if needs_passcode {
            self.passcode = PasscodeForm::default();
            self.overlay = Some(Overlay::Passcode);
            self.toast(
                ToastKind::Warning,
                "Passcode required",
                "Set a numeric passcode to unlock via calculator.",
            )
        } else {
            self.overlay = None;
            Command::none()
        }
    }

    fn reset_session(&mut self) {
        self.account = None;
        self.realtime = None;
        self.dm_channel = None;
        self.screen = Screen::Calculator;
        self.overlay = None;
        self.calculator = Calculator::new();
        self.inbox = Inbox::default();
        self.conversation = None;
        self.opening = None;
        self.composer.clear();
        self.selected = None;
        self.editing = None;
        self.confirm_delete = None;
        self.gifs = None;
        self.stories = StoryFeed::default();
        self.viewer = None;
    }

    fn enter_chat(&mut self) -> Command<AppMessage> {
        let Some(me) = self.me() else {
            return Command::none();
        };
        self.screen = Screen::Chat;
        self.overlay = None;
        let messenger = self.messenger.clone();
        let presence = Command::perform(
            async move { outcome(messenger.set_presence(me, true).await) },
            AppMessage::PresenceSet,
        );
        Command::batch([
            presence,
            self.reload_inbox(),
            self.reload_stories(),
            self.join_shared_channels(),
        ])
    }

    fn reload_inbox(&self) -> Command<AppMessage> {
        let Some(me) = self.me() else {
            return Command::none();
        };
        let messenger = self.messenger.clone();
        Command::perform(async move { outcome(messenger.load_inbox(me).await) }, AppMessage::InboxLoaded)
    }

    fn reload_stories(&self) -> Command<AppMessage> {
        let Some(me) = self.me() else {
            return Command::none();
        };
        let messenger = self.messenger.clone();
        Command::perform(async move { outcome(messenger.load_stories(me).await) }, AppMessage::StoriesLoaded)
    }

    fn open_conversation(&mut self, peer: Uuid) -> Command<AppMessage> {
        let Some(me) = self.me() else {
            return Command::none();
        };
        self.opening = Some(peer);
        self.selected = None;
        self.editing = None;
        self.confirm_delete = None;
        self.composer.clear();
        self.typing.reset();
        let notice = if self.peer() == Some(peer) {
            Command::none()
        } else {
            self.leaving_conversation()
        };
        let messenger = self.messenger.clone();
        Command::batch([
            notice,
            Command::perform(
                async move { outcome(messenger.open_conversation(me, peer).await) },
                move |result| AppMessage::ConversationLoaded(peer, result),
            ),
        ])
    }

    /// Uploads keep running after the thread closes; say so.
    fn leaving_conversation(&mut self) -> Command<AppMessage> {
        let uploading = self
            .conversation
            .as_ref()
            .map_or(false, Conversation::has_pending_uploads);
        if !uploading {
            return Command::none();
        }
        self.toast(
            ToastKind::Warning,
            "Still uploading",
            "The image is sent when the upload finishes.",
        )
    }

    fn upload_image(&mut self, file: LocalFile) -> Command<AppMessage> {
        let (Some(me), Some(peer)) = (self.me(), self.peer()) else {
            return self.fail("Attach image", ClientError::NoChatSelected.into());
        };
        if let Err(e) = validate_chat_image(&file) {
            return self.fail("Attach image", e.into());
        }
        let Some(conversation) = self.conversation.as_mut() else {
            return Command::none();
        };
        let temp_id = conversation.begin_upload(&file.name);
        let reply_to = conversation.reply_target_id();
        let messenger = self.messenger.clone();
        Command::batch([
            Command::perform(
                async move { outcome(messenger.send_image(me, peer, file, reply_to).await) },
                move |result| AppMessage::ImageUploaded(peer, temp_id, result),
            ),
            self.snap_to_bottom(),
        ])
    }

    /// Folds rows from our own writes into the thread and the inbox.
    fn apply_rows(&mut self, rows: Vec<Message>) {
        for row in rows {
            self.inbox.apply_message(&row);
            if let Some(conversation) = self.conversation.as_mut() {
                if conversation.apply(row) == Applied::Ignored {
                    debug!("Row belongs to another conversation");
                }
            }
        }
    }

    fn fetch_reply_bases(&self) -> Command<AppMessage> {
        let Some(conversation) = self.conversation.as_ref() else {
            return Command::none();
        };
        let missing = conversation.missing_reply_bases();
        if missing.is_empty() {
            return Command::none();
        }
        let messenger = self.messenger.clone();
        Command::perform(async move { messenger.fetch_messages(missing).await }, AppMessage::ReplyBases)
    }

    fn emit_typing(&mut self) -> Command<AppMessage> {
        let (Some(me), Some(peer), Some(handle)) = (self.me(), self.peer(), self.realtime.clone()) else {
            return Command::none();
        };
        if !self.typing.should_emit(Instant::now()) {
            return Command::none();
        }
        let payload = match serde_json::to_value(TypingSignal { from: me, to: peer }) {
            Ok(payload) => payload,
            Err(e) => return self.fail("Typing signal", ClientError::from(e).into()),
        };
        Command::perform(
            async move { outcome(handle.broadcast(TYPING_CHANNEL, TYPING_EVENT, payload).await) },
            AppMessage::RealtimeSent,
        )
    }

    fn fetch_gifs(&self, request: PageRequest) -> Command<AppMessage> {
        let tenor = self.tenor.clone();
        Command::perform(
            async move {
                let page = tenor
                    .fetch(request.kind, &request.query, request.pos.as_deref())
                    .await;
                (request, outcome(page))
            },
            |(request, page)| AppMessage::GifPage(request, page),
        )
    }

    fn view_story(&mut self, story: Uuid) -> Command<AppMessage> {
        let Some(me) = self.me() else {
            return Command::none();
        };
        self.stories.mark_viewed(story);
        let messenger = self.messenger.clone();
        Command::perform(
            async move { outcome(messenger.record_story_view(me, story).await) },
            AppMessage::StoryViewed,
        )
    }

    fn join(&self, channel: String, config: ChannelConfig) -> Command<AppMessage> {
        let Some(handle) = self.realtime.clone() else {
            return Command::none();
        };
        let messenger = self.messenger.clone();
        Command::perform(
            async move {
                let token = messenger.access_token().await.unwrap_or_default();
                outcome(handle.join(&channel, config, &token).await)
            },
            AppMessage::RealtimeSent,
        )
    }

    /// Hands the realtime worker a fresh access token now and then.
    fn push_token(&mut self, now: Instant) -> Command<AppMessage> {
        let Some(handle) = self.realtime.clone() else {
            return Command::none();
        };
        if now.duration_since(self.token_pushed) < TOKEN_PUSH_EVERY {
            return Command::none();
        }
        self.token_pushed = now;
        let messenger = self.messenger.clone();
        Command::perform(
            async move {
                match messenger.access_token().await {
                    Some(token) => outcome(handle.refresh_token(&token).await),
                    None => Ok(()),
                }
            },
            AppMessage::RealtimeSent,
        )
    }

    fn join_shared_channels(&self) -> Command<AppMessage> {
        let Some(me) = self.me() else {
            return Command::none();
        };
        Command::batch([
            self.join(INBOX_CHANNEL.to_string(), realtime::inbox_channel(me)),
            self.join(TYPING_CHANNEL.to_string(), realtime::typing_channel()),
            self.join(STORIES_CHANNEL.to_string(), realtime::stories_channel()),
        ])
    }

    /// Leaves the previous `dm-*` channel before joining the new one.
    fn switch_dm_channel(&mut self, peer: Uuid) -> Command<AppMessage> {
        let (Some(me), Some(handle)) = (self.me(), self.realtime.clone()) else {
            return Command::none();
        };
        let (channel, config) = realtime::dm_channel(me, peer);
        let previous = self.dm_channel.replace(channel.clone());
        let messenger = self.messenger.clone();
        Command::perform(
            async move {
                if let Some(previous) = previous.filter(|p| *p != channel) {
                    handle.leave(&previous).await?;
                }
                let token = messenger.access_token().await.unwrap_or_default();
                handle.join(&channel, config, &token).await
            },
            |result| AppMessage::RealtimeSent(outcome(result)),
        )
    }

    fn leave_dm_channel(&mut self) -> Command<AppMessage> {
        let (Some(channel), Some(handle)) = (self.dm_channel.take(), self.realtime.clone()) else {
            return Command::none();
        };
        Command::perform(
            async move { outcome(handle.leave(&channel).await) },
            AppMessage::RealtimeSent,
        )
    }

    fn on_realtime(&mut self, event: RealtimeEvent) -> Command<AppMessage> {
        let Some(me) = self.me() else {
            return Command::none();
        };
        match event {
            RealtimeEvent::Change { channel, table, .. } if table == "stories" => {
                debug!("New story on {}", channel);
                self.reload_stories()
            }
            RealtimeEvent::Change {
                channel,
                kind,
                table,
                record,
            } if table == "messages" => {
                let message: Message = match serde_json::from_value(record) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("Unreadable message row on {}: {}", channel, e);
                        return Command::none();
                    }
                };
                if channel == INBOX_CHANNEL {
                    self.on_inbox_change(me, kind, message)
                } else if realtime::is_dm_channel(&channel) {
                    self.on_dm_change(me, kind, message)
                } else {
                    Command::none()
                }
            }
            RealtimeEvent::Change { .. } => Command::none(),
            RealtimeEvent::Broadcast { event, payload, .. } if event == TYPING_EVENT => {
                let Ok(signal) = serde_json::from_value::<TypingSignal>(payload) else {
                    return Command::none();
                };
                if let Some(from) = signal.sender_for(me) {
                    let now = Instant::now();
                    self.inbox.show_typing(from, now);
                    if let Some(conversation) = self.conversation.as_mut().filter(|c| c.peer() == from) {
                        conversation.show_typing(now);
                    }
                }
                Command::none()
            }
            RealtimeEvent::Broadcast { .. } => Command::none(),
            RealtimeEvent::Joined { channel } => {
                debug!("Joined {}", channel);
                Command::none()
            }
            RealtimeEvent::Closed { channel } => {
                debug!("Channel {} closed", channel);
                Command::none()
            }
            RealtimeEvent::ChannelError { channel, message } => {
                warn!("Channel {} error: {}", channel, message);
                Command::none()
            }
            RealtimeEvent::Disconnected(reason) => {
                warn!("Realtime disconnected: {}", reason);
                // No stop signal will arrive for indicators shown before the drop.
                self.inbox.clear_typing();
                if let Some(conversation) = self.conversation.as_mut() {
                    conversation.hide_typing();
                }
                Command::none()
            }
        }
    }

    fn on_inbox_change(&mut self, me: Uuid, kind: ChangeKind, message: Message) -> Command<AppMessage> {
        self.inbox.apply_message(&message);
        if message.receiver_id != me {
            return Command::none();
        }
        let sender = message.sender_id;
        let messenger = self.messenger.clone();
        let refresh = Command::perform(
            async move { outcome(messenger.refresh_unread(me, sender).await) },
            move |result| AppMessage::UnreadRefreshed(sender, result),
        );
        // The open thread acknowledges its own rows.
        if receipt_for(me, self.peer(), kind, &message) != Some(Receipt::Delivered) {
            return refresh;
        }
        let messenger = self.messenger.clone();
        let delivered = Command::perform(
            async move { outcome(messenger.acknowledge(me, message, false).await) },
            AppMessage::Acknowledged,
        );
        Command::batch([refresh, delivered])
    }

    fn on_dm_change(&mut self, me: Uuid, kind: ChangeKind, message: Message) -> Command<AppMessage> {
        let Some(conversation) = self.conversation.as_mut() else {
            return Command::none();
        };
        let receipt = receipt_for(me, Some(conversation.peer()), kind, &message);
        let applied = conversation.apply(message.clone());
        if applied == Applied::Ignored {
            return Command::none();
        }
        let mut commands = vec![self.fetch_reply_bases()];
        if receipt == Some(Receipt::Seen) {
            if let Some(conversation) = self.conversation.as_mut() {
                conversation.hide_typing();
            }
            let messenger = self.messenger.clone();
            commands.push(Command::perform(
                async move { outcome(messenger.acknowledge(me, message, true).await) },
                AppMessage::Acknowledged,
            ));
        }
        if applied == Applied::Inserted {
            commands.push(self.snap_to_bottom());
        }
        Command::batch(commands)
    }

    /// Starts downloads for remote images the current screen shows.
    fn fetch_images(&mut self) -> Command<AppMessage> {
        let wanted: Vec<String> = self
            .visible_image_urls()
            .into_iter()
            .filter(|url| !self.images.contains_key(url) && !self.requested_images.contains(url))
            .collect();
        if wanted.is_empty() {
            return Command::none();
        }
        let commands = wanted.into_iter().map(|url| {
            self.requested_images.insert(url.clone());
            let http = self.http.clone();
            Command::perform(
                async move {
                    let bytes = async {
                        let resp = http.get(&url).send().await?.error_for_status()?;
                        Ok::<_, reqwest::Error>(resp.bytes().await?.to_vec())
                    }
                    .await
                    .map_err(|e| Failure::from(ClientError::from(e)));
                    (url, bytes)
                },
                |(url, bytes)| AppMessage::ImageFetched(url, bytes),
            )
        });
        Command::batch(commands.collect::<Vec<_>>())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::fake::{profile, session_for, FakeBackend};
    use crate::local_store::LocalStore;
    use crate::models::PublicProfile;

    fn public(id: Uuid, name: &str) -> PublicProfile {
        PublicProfile {
            id,
            username: Some(name.to_string()),
            avatar_url: None,
            is_online: false,
            last_active: None,
        }
    }

    /// An unlocked app for `me` with one peer in the inbox.
    fn unlocked_app() -> (App, Uuid, Uuid) {
        let (backend, me) = FakeBackend::signed_in("neo");
        let peer = backend.add_user("trinity");
        let store = LocalStore::new(":memory:").unwrap();
        let flags = Flags {
            messenger: Messenger::new(Arc::new(backend), store),
            tenor: TenorClient::new(None, 1000).unwrap(),
            realtime_url: "ws://127.0.0.1:9/realtime".to_string(),
            http: reqwest::Client::new(),
        };
        let (mut app, _) = App::new(flags);
        app.account = Some(Account {
            session: session_for(me),
            profile: profile(me, "neo"),
            needs_passcode: false,
        });
        app.screen = Screen::Chat;
        app.inbox = Inbox::build(me, vec![public(peer, "trinity")], vec![], vec![], vec![]);
        (app, me, peer)
    }

    fn incoming(from: Uuid, to: Uuid, content: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            sender_id: from,
            receiver_id: to,
            kind: MessageKind::Text,
            content: content.to_string(),
            reply_to_id: None,
            created_at: Utc::now(),
            updated_at: None,
            delivered_at: None,
            seen_at: None,
        }
    }

    fn status_of(app: &App, peer: Uuid) -> String {
        app.inbox
            .rows(app.now, Utc::now())
            .into_iter()
            .find(|r| r.id == peer)
            .map(|r| r.status)
            .unwrap_or_default()
    }

    #[test]
    fn test_failure_keeps_title_and_message() {
        let failure = Failure::from(ClientError::validation("Max 5 MB"));
        assert_eq!(failure.title, "Check your input");
        assert_eq!(failure.message, "Max 5 MB");
        let failure = Failure::from(ClientError::NoRowsUpdated);
        assert_eq!(failure.title, "Request failed");
    }

    #[test]
    fn test_toasts_are_added_and_dismissed() {
        let (mut app, _, _) = unlocked_app();
        let _ = app.update(AppMessage::Unlocked(Ok(false)));
        assert_eq!(app.toasts.len(), 1);
        assert_eq!(app.toasts[0].kind, ToastKind::Error);
        let id = app.toasts[0].id;
        let _ = app.update(AppMessage::DismissToast(id));
        assert!(app.toasts.is_empty());
    }

    #[test]
    fn test_typing_broadcast_for_me_shows_in_inbox() {
        let (mut app, me, peer) = unlocked_app();
        let stranger = Uuid::new_v4();
        let _ = app.update(AppMessage::Realtime(RealtimeEvent::Broadcast {
            channel: TYPING_CHANNEL.to_string(),
            event: TYPING_EVENT.to_string(),
            payload: serde_json::json!({ "from": peer, "to": stranger }),
        }));
        assert_ne!(status_of(&app, peer), "Typing…");

        let _ = app.update(AppMessage::Realtime(RealtimeEvent::Broadcast {
            channel: TYPING_CHANNEL.to_string(),
            event: TYPING_EVENT.to_string(),
            payload: serde_json::json!({ "from": peer, "to": me }),
        }));
        assert_eq!(status_of(&app, peer), "Typing…");
    }

    #[test]
    fn test_inbox_change_updates_snippet() {
        let (mut app, me, peer) = unlocked_app();
        let message = incoming(peer, me, "hello there");
        let _ = app.update(AppMessage::Realtime(RealtimeEvent::Change {
            channel: INBOX_CHANNEL.to_string(),
            kind: ChangeKind::Insert,
            table: "messages".to_string(),
            record: serde_json::to_value(&message).unwrap(),
        }));
        assert_eq!(status_of(&app, peer), "Received: hello there");
    }

    #[test]
    fn test_stale_conversation_load_is_ignored() {
        let (mut app, me, peer) = unlocked_app();
        let other = Uuid::new_v4();
        let _ = app.update(AppMessage::OpenConversation(peer));
        let stale = Conversation::new(me, other, Default::default());
        let _ = app.update(AppMessage::ConversationLoaded(other, Ok(stale)));
        assert!(app.conversation.is_none());

        app.inbox.set_unread(peer, 3);
        let fresh = Conversation::new(me, peer, Default::default());
        let _ = app.update(AppMessage::ConversationLoaded(peer, Ok(fresh)));
        assert_eq!(app.peer(), Some(peer));
        assert_eq!(app.inbox.unread(peer), 0);
    }

    #[test]
    fn test_gif_picker_needs_open_chat_and_key() {
        let (mut app, me, peer) = unlocked_app();
        let _ = app.update(AppMessage::OpenGifs(GifKind::Gifs));
        assert!(app.gifs.is_none());

        app.conversation = Some(Conversation::new(me, peer, Default::default()));
        let _ = app.update(AppMessage::OpenGifs(GifKind::Gifs));
        assert!(app.gifs.is_none());
        assert_eq!(app.toasts.last().map(|t| t.kind), Some(ToastKind::Warning));
    }

    fn dm_change(me: Uuid, peer: Uuid, message: &Message) -> AppMessage {
        AppMessage::Realtime(RealtimeEvent::Change {
            channel: realtime::dm_channel(me, peer).0,
            kind: ChangeKind::Insert,
            table: "messages".to_string(),
            record: serde_json::to_value(message).unwrap(),
        })
    }

    #[test]
    fn test_upload_result_only_touches_its_own_conversation() {
        let (mut app, me, peer) = unlocked_app();
        let other = Uuid::new_v4();
        let mut open = Conversation::new(me, other, Default::default());
        let temp_id = open.begin_upload("dog.png");
        assert_eq!(temp_id, 1);
        app.conversation = Some(open);

        // An upload that began in the thread with `peer` also had temp id 1.
        let _ = app.update(AppMessage::ImageUploaded(
            peer,
            1,
            Err(Failure::from(ClientError::NoRowsUpdated)),
        ));
        let items = app.conversation.as_ref().unwrap().items();
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0].body, crate::conversation::Body::Uploading(_)));
        assert_eq!(app.toasts.last().map(|t| t.kind), Some(ToastKind::Error));

        let mut row = incoming(me, peer, "https://cdn/cat.png");
        row.kind = MessageKind::Image;
        let _ = app.update(AppMessage::ImageUploaded(peer, 1, Ok(vec![row])));
        assert_eq!(app.conversation.as_ref().unwrap().items().len(), 1);
        assert!(app.conversation.as_ref().unwrap().has_pending_uploads());

        let _ = app.update(AppMessage::ImageUploaded(other, 1, Ok(vec![])));
        assert!(!app.conversation.as_ref().unwrap().has_pending_uploads());
    }

    #[test]
    fn test_leaving_with_upload_in_flight_warns() {
        let (mut app, me, peer) = unlocked_app();
        let mut open = Conversation::new(me, peer, Default::default());
        open.begin_upload("cat.png");
        app.conversation = Some(open);
        let _ = app.update(AppMessage::BackToInbox);
        assert!(app.conversation.is_none());
        assert_eq!(app.toasts.len(), 1);
        assert_eq!(app.toasts[0].kind, ToastKind::Warning);
        assert_eq!(app.toasts[0].title, "Still uploading");

        app.conversation = Some(Conversation::new(me, peer, Default::default()));
        let _ = app.update(AppMessage::BackToInbox);
        assert_eq!(app.toasts.len(), 1);
    }

    #[test]
    fn test_receipt_depends_on_open_thread() {
        let me = Uuid::new_v4();
        let peer = Uuid::new_v4();
        let message = incoming(peer, me, "hi");
        assert_eq!(receipt_for(me, Some(peer), ChangeKind::Insert, &message), Some(Receipt::Seen));
        assert_eq!(receipt_for(me, None, ChangeKind::Insert, &message), Some(Receipt::Delivered));
        assert_eq!(
            receipt_for(me, Some(Uuid::new_v4()), ChangeKind::Insert, &message),
            Some(Receipt::Delivered)
        );
        assert_eq!(receipt_for(me, Some(peer), ChangeKind::Update, &message), None);
        let mine = incoming(me, peer, "hey");
        assert_eq!(receipt_for(me, Some(peer), ChangeKind::Insert, &mine), None);
    }

    #[test]
    fn test_incoming_row_in_open_thread_hides_typing_and_wants_reply_base() {
        let (mut app, me, peer) = unlocked_app();
        let mut open = Conversation::new(me, peer, Default::default());
        open.show_typing(app.now);
        app.conversation = Some(open);
        assert!(app.conversation.as_ref().unwrap().peer_is_typing(app.now));

        let base = Uuid::new_v4();
        let mut message = incoming(peer, me, "replying");
        message.reply_to_id = Some(base);
        let _ = app.update(dm_change(me, peer, &message));

        let conversation = app.conversation.as_ref().unwrap();
        assert!(!conversation.peer_is_typing(app.now));
        assert_eq!(conversation.items().len(), 1);
        assert_eq!(conversation.items()[0].id, Some(message.id));
        assert_eq!(conversation.missing_reply_bases(), vec![base]);
    }

    #[test]
    fn test_dm_row_for_previous_peer_is_ignored() {
        let (mut app, me, peer) = unlocked_app();
        let previous = Uuid::new_v4();
        let mut open = Conversation::new(me, peer, Default::default());
        open.show_typing(app.now);
        app.conversation = Some(open);

        let stale = incoming(previous, me, "late");
        let _ = app.update(dm_change(me, previous, &stale));

        let conversation = app.conversation.as_ref().unwrap();
        assert!(conversation.items().is_empty());
        assert!(conversation.peer_is_typing(app.now));
    }

    #[test]
    fn test_disconnect_clears_typing_indicators() {
        let (mut app, me, peer) = unlocked_app();
        let _ = app.update(AppMessage::Realtime(RealtimeEvent::Broadcast {
            channel: TYPING_CHANNEL.to_string(),
            event: TYPING_EVENT.to_string(),
            payload: serde_json::json!({ "from": peer, "to": me }),
        }));
        let mut open = Conversation::new(me, peer, Default::default());
        open.show_typing(app.now);
        app.conversation = Some(open);
        assert_eq!(status_of(&app, peer), "Typing…");

        let _ = app.update(AppMessage::Realtime(RealtimeEvent::Disconnected("reset".into())));
        assert_ne!(status_of(&app, peer), "Typing…");
        assert!(!app.conversation.as_ref().unwrap().peer_is_typing(app.now));
    }
}
