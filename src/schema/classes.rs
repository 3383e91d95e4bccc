use super::{ClassDef, Clp, FieldDef};

/// Roles allowed to manage `_Role` objects directly.
const ROLE_ADMINS: &[&str] = &["SuperAdmin", "Admin"];

pub fn all() -> Vec<ClassDef> {
    vec![
        ClassDef::new("_User")
            .field(FieldDef::object("authData"))
            .field(FieldDef::string("username"))
            .field(FieldDef::string("email"))
            .field(FieldDef::string("mobile"))
            .field(FieldDef::string("mobileNumber"))
            .field(FieldDef::string("fcm_token"))
            .field(FieldDef::string("fullName"))
            .field(FieldDef::pointer("userBlock", "UserBlock"))
            .field(FieldDef::pointer("deleted", "UserDeleted"))
            .field(FieldDef::pointer("accountStatus", "AccountStatus"))
            .field(FieldDef::boolean("status"))
            .field(FieldDef::date("birthDate"))
            .field(FieldDef::string("fatherName"))
            .field(FieldDef::file("profilePic"))
            .field(FieldDef::pointer("role", "_Role"))
            .field(FieldDef::number("placement_test_score"))
            .with_clp(Clp::public()),
        ClassDef::new("_Role")
            .field(FieldDef::string("name").required())
            .field(FieldDef::boolean("isCustom"))
            .with_clp(Clp::restricted_to(ROLE_ADMINS)),
        ClassDef::new("_Session")
            .field(FieldDef::pointer("user", "_User").required())
            .field(FieldDef::date("expiresAt"))
            .field(FieldDef::object("createdWith")),
        ClassDef::new("AccountStatus")
            .field(FieldDef::string("code"))
            .field(FieldDef::object("name"))
            .with_clp(Clp::authenticated()),
        ClassDef::new("UserBlock")
            .field(FieldDef::boolean("isBlocked"))
            .with_clp(Clp::authenticated()),
        ClassDef::new("UserDeleted")
            .field(FieldDef::boolean("isDeleted"))
            .with_clp(Clp::authenticated()),
        ClassDef::new("OTPcode")
            .field(FieldDef::string("mobileNumber"))
            .field(FieldDef::string("code")),
        ClassDef::new("StaffProfile")
            .field(FieldDef::pointer("user", "_User"))
            .field(FieldDef::string("fullName"))
            .field(FieldDef::string("specialization"))
            .field(FieldDef::string("bio")),
        ClassDef::new("ChildProfile")
            .field(FieldDef::pointer("user", "_User"))
            .field(FieldDef::string("name"))
            .field(FieldDef::string("fatherName"))
            .field(FieldDef::string("birthdate"))
            .field(FieldDef::string("gender"))
            .field(FieldDef::string("medical_info")),
        ClassDef::new("AppointmentPlan")
            .field(FieldDef::string("title").required())
            .field(FieldDef::number("duration_minutes").required())
            .field(FieldDef::number("price").required())
            .field(FieldDef::string("description"))
            .with_clp(Clp::public()),
        ClassDef::new("Appointment")
            .field(FieldDef::pointer("user_id", "_User").required())
            .field(FieldDef::pointer("provider_id", "_User").required())
            .field(FieldDef::pointer("child_id", "ChildProfile").required())
            .field(FieldDef::pointer("appointment_plan_id", "AppointmentPlan").required())
            .field(FieldDef::string("note"))
            .field(FieldDef::string("status").required())
            .with_clp(Clp::public()),
        ClassDef::new("Invoice")
            .field(FieldDef::pointer("appointment_id", "Appointment").required())
            .field(FieldDef::number("amount").required())
            .field(FieldDef::string("status").required())
            .with_clp(Clp::public()),
        ClassDef::new("Wallet")
            .field(FieldDef::pointer("user_id", "_User").required())
            .field(FieldDef::number("balance").required())
            .with_clp(Clp::public()),
        ClassDef::new("WalletTransaction")
            .field(FieldDef::pointer("from_wallet", "Wallet").required())
            .field(FieldDef::pointer("to_wallet", "Wallet").required())
            .field(FieldDef::number("amount").required())
            .field(FieldDef::string("type").required())
            .field(FieldDef::pointer("appointment_id", "Appointment")),
        ClassDef::new("ChargeRequest")
            .field(FieldDef::pointer("wallet_id", "Wallet").required())
            .field(FieldDef::number("amount").required())
            .field(FieldDef::string("status").required())
            .field(FieldDef::string("note"))
            .field(FieldDef::file("receipt_image"))
            .field(FieldDef::string("rejection_note"))
            .with_clp(Clp::public()),
        ClassDef::new("ChatGroup")
            .field(FieldDef::pointer("appointment_id", "Appointment").required())
            .field(FieldDef::pointer("child_id", "ChildProfile"))
            .field(FieldDef::string("last_message"))
            .field(FieldDef::string("chat_status").required())
            .with_clp(Clp::public()),
        ClassDef::new("ChatGroupParticipants")
            .field(FieldDef::pointer("chat_group_id", "ChatGroup").required())
            .field(FieldDef::pointer("user_id", "_User").required())
            .with_clp(Clp::public()),
        ClassDef::new("ChatMessage")
            .field(FieldDef::pointer("chat_group_id", "ChatGroup").required())
            .field(FieldDef::pointer("send_id", "_User").required())
            .field(FieldDef::pointer("receive_id", "_User"))
            .field(FieldDef::pointer("child_id", "ChildProfile"))
            .field(FieldDef::string("message").required())
            .field(FieldDef::pointer("notifications_id", "Notifications"))
            .field(FieldDef::date("time").required())
            .field(FieldDef::boolean("is_read"))
            .field(FieldDef::date("read_at"))
            .with_clp(Clp::public()),
        ClassDef::new("Notifications")
            .field(FieldDef::pointer("user_id", "_User").required())
            .field(FieldDef::string("title").required())
            .field(FieldDef::string("body").required())
            .field(FieldDef::string("type"))
            .field(FieldDef::pointer("appointment_id", "Appointment"))
            .field(FieldDef::pointer("chat_group_id", "ChatGroup"))
            .field(FieldDef::string("image"))
            .field(FieldDef::boolean("is_read"))
            .with_clp(Clp::public()),
        ClassDef::new("Level")
            .field(FieldDef::string("name").required())
            .field(FieldDef::string("code"))
            .field(FieldDef::string("description"))
            .field(FieldDef::number("order"))
            .with_clp(Clp::public()),
        ClassDef::new("LevelGame")
            .field(FieldDef::pointer("level_id", "Level").required())
            .field(FieldDef::string("name").required())
            .field(FieldDef::number("order").required())
            .with_clp(Clp::public()),
        ClassDef::new("ChildLevel")
            .field(FieldDef::pointer("child", "ChildProfile"))
            .field(FieldDef::pointer("level", "Level"))
            .field(FieldDef::number("current_game_order")),
        ClassDef::new("StageQuestion")
            .field(FieldDef::pointer("level_game_id", "LevelGame").required())
            .field(FieldDef::string("question_type").required())
            .field(FieldDef::string("instruction"))
            .field(FieldDef::array("images"))
            .field(FieldDef::object("correct_answer"))
            .field(FieldDef::object("options"))
            .field(FieldDef::number("order"))
            .with_clp(Clp::public()),
        ClassDef::new("StageResult")
            .field(FieldDef::pointer("user_id", "_User").required())
            .field(FieldDef::pointer("level_game_id", "LevelGame").required())
            .field(FieldDef::number("score"))
            .field(FieldDef::number("total_questions"))
            .field(FieldDef::array("answers"))
            .with_clp(Clp::public()),
        ClassDef::new("TrainingQuestion")
            .field(FieldDef::file("question_image_url"))
            .field(FieldDef::file("option_a"))
            .field(FieldDef::file("option_b"))
            .field(FieldDef::file("option_c"))
            .with_clp(Clp::public()),
        ClassDef::new("TrainingQuestionCorrectAnswer")
            .field(FieldDef::pointer("question", "TrainingQuestion"))
            .field(FieldDef::string("correct_option")),
        ClassDef::new("TrainingSession")
            .field(FieldDef::pointer("user_id", "_User").required())
            .field(FieldDef::number("correct_count").required())
            .field(FieldDef::number("current_index").required()),
        ClassDef::new("PlacementTestQuestion")
            .field(FieldDef::file("question_image"))
            .field(FieldDef::file("option_a_image"))
            .field(FieldDef::file("option_b_image"))
            .field(FieldDef::file("option_c_image"))
            .field(FieldDef::file("option_d_image")),
        ClassDef::new("PlacementTestCorrectAnswer")
            .field(FieldDef::pointer("question", "PlacementTestQuestion"))
            .field(FieldDef::string("correct_option")),
        ClassDef::new("IMG")
            .field(FieldDef::file("image"))
            .field(FieldDef::file("imageThumbNail"))
            .field(FieldDef::string("blurHash"))
            .with_clp(Clp::authenticated()),
    ]
}
