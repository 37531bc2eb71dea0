use tera::{Context, Tera};
use tracing::warn;

use crate::language::Language;

pub const ELLIPSIS: &str = "...";

/// Fixed user-facing strings for one language.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Catalog {
    pub rephrase: &'static str,
    pub ai_error: &'static str,
    pub empty_default: &'static str,
    pub human_timeout_notice: &'static str,
    pub attachment_image_notice: &'static str,
    pub attachment_file_notice: &'static str,
    pub handoff_rate_limited: &'static str,
    pub handoff_accepted: &'static str,
    pub booking_confirmed: &'static str,
}

const KO: Catalog = Catalog {
    rephrase: "죄송합니다, 요청을 정확히 이해하지 못했어요. 조금 다른 방식으로 말씀해주시겠어요?",
    ai_error: "죄송합니다, AI 시스템에 일시적인 오류가 발생했습니다. 잠시 후 다시 시도해주세요.",
    empty_default: "도움이 필요하신 내용을 조금만 더 구체적으로 알려주실 수 있을까요?",
    human_timeout_notice: "상담원이 일정 시간 응답하지 않아 AI 모드로 전환되었습니다. 계속 원하시는 내용을 말씀해 주세요.",
    attachment_image_notice: "사진 잘 받았어요! 의사가 확인한 뒤 낮 시간에 자세히 안내드릴게요.",
    attachment_file_notice: "파일 잘 받았어요! 의사가 확인한 뒤 낮 시간에 자세히 안내드릴게요.",
    handoff_rate_limited: "AI가 계속해서 도움을 드리겠습니다. 추가 도움이 필요하시면 다시 말씀해주세요.",
    handoff_accepted: "상담원이 곧 연결될 때까지 잠시만 기다려주세요.",
    booking_confirmed: "{{ name }}님의 예약이 완료되었습니다! 📅\n예약 시간: {{ time }}\n곧 확인 연락을 드리겠습니다.",
};

const EN: Catalog = Catalog {
    rephrase: "I'm sorry, I didn't understand your request. Could you please rephrase it?",
    ai_error: "Sorry, there was a temporary error with the AI system. Please try again later.",
    empty_default: "Could you please provide more specific details about what you need help with?",
    human_timeout_notice: "Our staff did not respond for a while, so the AI assistant is back. Please tell us what you need.",
    attachment_image_notice: "We received your photo! A doctor will review it and get back to you during the day.",
    attachment_file_notice: "We received your file! A doctor will review it and get back to you during the day.",
    handoff_rate_limited: "The AI will keep helping you. If you need more help, please ask again.",
    handoff_accepted: "Please wait a moment while we connect you to a staff member.",
    booking_confirmed: "{{ name }}, your appointment has been confirmed! 📅\nAppointment time: {{ time }}\nWe will contact you shortly for confirmation.",
};

const TH: Catalog = Catalog {
    rephrase: "ขอโทษค่ะ ฉันเข้าใจคำถามของคุณไม่ค่อยค่ะ กรุณาถามใหม่ได้ไหมคะ",
    ai_error: "ขอโทษค่ะ มีข้อผิดพลาดชั่วคราวในระบบ AI กรุณาลองใหม่ในอีกสักครู่ค่ะ",
    empty_default: "ช่วยบอกรายละเอียดที่ต้องการความช่วยเหลือให้ชัดเจนหน่อยได้ไหมคะ",
    human_timeout_notice: "เจ้าหน้าที่ไม่ได้ตอบกลับสักพัก ระบบ AI จะดูแลต่อค่ะ กรุณาบอกสิ่งที่ต้องการได้เลยค่ะ",
    attachment_image_notice: "ได้รับรูปภาพแล้วค่ะ! แพทย์จะตรวจสอบและแจ้งรายละเอียดในช่วงกลางวันค่ะ",
    attachment_file_notice: "ได้รับไฟล์แล้วค่ะ! แพทย์จะตรวจสอบและแจ้งรายละเอียดในช่วงกลางวันค่ะ",
    handoff_rate_limited: "AI จะช่วยเหลือคุณต่อไปค่ะ หากต้องการความช่วยเหลือเพิ่มเติม กรุณาแจ้งอีกครั้งค่ะ",
    handoff_accepted: "กรุณารอสักครู่ เจ้าหน้าที่จะติดต่อกลับค่ะ",
    booking_confirmed: "คุณ{{ name }} การจองของคุณเสร็จสมบูรณ์แล้วค่ะ! 📅\nเวลานัดหมาย: {{ time }}\nเราจะติดต่อกลับเพื่อยืนยันค่ะ",
};

const JA: Catalog = Catalog {
    rephrase: "すみません、リクエストを理解できませんでした。別の表現で言い換えていただけますか？",
    ai_error: "すみません、AIシステムに一時的なエラーが発生しました。少し待ってから再度お試しください。",
    empty_default: "必要なサポートについて、もう少し具体的に教えていただけますか？",
    human_timeout_notice: "担当者からの応答がしばらくなかったため、AIモードに切り替わりました。ご用件をお聞かせください。",
    attachment_image_notice: "お写真を受け取りました！医師が確認のうえ、日中に詳しくご案内いたします。",
    attachment_file_notice: "ファイルを受け取りました！医師が確認のうえ、日中に詳しくご案内いたします。",
    handoff_rate_limited: "引き続きAIがサポートいたします。さらにお手伝いが必要な場合は、もう一度お知らせください。",
    handoff_accepted: "担当者におつなぎしますので、少々お待ちください。",
    booking_confirmed: "{{ name }}様のご予約が完了いたしました！📅\nご予約時間: {{ time }}\n確認のご連絡を差し上げます。",
};

const ZH: Catalog = Catalog {
    booking_confirmed: "{{ name }}，您的预约已确认！📅\n预约时间: {{ time }}\n我们将很快联系您确认。",
    ..EN
};

const VI: Catalog = Catalog {
    booking_confirmed: "{{ name }}, lịch hẹn của bạn đã được xác nhận! 📅\nThời gian hẹn: {{ time }}\nChúng tôi sẽ liên hệ với bạn sớm.",
    ..EN
};

const ES: Catalog = Catalog {
    booking_confirmed: "{{ name }}, ¡tu cita ha sido confirmada! 📅\nHora de la cita: {{ time }}\nTe contactaremos pronto para confirmación.",
    ..EN
};

const PT: Catalog = Catalog {
    booking_confirmed: "{{ name }}, sua consulta foi confirmada! 📅\nHorário da consulta: {{ time }}\nEntraremos em contato em breve.",
    ..EN
};

const FR: Catalog = Catalog {
    booking_confirmed: "{{ name }}, votre rendez-vous a été confirmé! 📅\nHeure du rendez-vous: {{ time }}\nNous vous contacterons bientôt.",
    ..EN
};

const DE: Catalog = Catalog {
    booking_confirmed: "{{ name }}, Ihr Termin wurde bestätigt! 📅\nTerminzeit: {{ time }}\nWir werden Sie bald kontaktieren.",
    ..EN
};

const MS: Catalog = Catalog {
    booking_confirmed: "{{ name }}, janji temu anda telah disahkan! 📅\nMasa janji temu: {{ time }}\nKami akan menghubungi anda tidak lama lagi.",
    ..EN
};

/// Catalog for `language`; languages without their own entries use English.
pub fn catalog(language: Language) -> &'static Catalog {
    match language {
        Language::Ko => &KO,
        Language::Th => &TH,
        Language::Ja => &JA,
        Language::Zh => &ZH,
        Language::Vi => &VI,
        Language::Es => &ES,
        Language::Pt => &PT,
        Language::Fr => &FR,
        Language::De => &DE,
        Language::Ms => &MS,
        Language::En | Language::Id | Language::Ar | Language::Hi | Language::Ru => &EN,
    }
}

const KO_ENDERS: &[&str] = &[
    "했습니다.", "했습니다!", "했습니다?",
    "있습니다.", "있습니다!", "있습니다?",
    "습니다.", "습니다!", "습니다?",
    "입니다.", "입니다!", "입니다?",
    "됩니다.", "됩니다!", "됩니다?",
    "하세요.", "하세요!", "하세요?",
    "이에요.", "이에요!", "이에요?",
    "해요.", "해요!", "해요?",
    "예요.", "예요!", "예요?",
    "에요.", "에요!", "에요?",
    ".", "!", "?",
];

const TH_ENDERS: &[&str] = &[
    "นะครับ.", "นะครับ!", "นะครับ?",
    "นะคะ.", "นะคะ!", "นะคะ?",
    "ครับ.", "ครับ!", "ครับ?",
    "ค่ะ.", "ค่ะ!", "ค่ะ?",
    "คะ.", "คะ!", "คะ?",
    ".", "!", "?",
];

const JA_ENDERS: &[&str] = &[
    "でした.", "でした!", "でした?",
    "ました.", "ました!", "ました?",
    "です.", "です!", "です?",
    "ます.", "ます!", "ます?",
    "。", "！", "？",
    ".", "!", "?",
];

const EN_ENDERS: &[&str] = &[
    " help.", " help!", " help?",
    " you.", " you!", " you?",
    " it.", " it!", " it?",
    ".", "!", "?",
];

/// Sentence endings, most specific first.
pub fn sentence_enders(language: Language) -> &'static [&'static str] {
    match language {
        Language::Ko => KO_ENDERS,
        Language::Th => TH_ENDERS,
        Language::Ja => JA_ENDERS,
        _ => EN_ENDERS,
    }
}

pub fn ellipsis(_language: Language) -> &'static str {
    ELLIPSIS
}

/// Renders the booking confirmation template. A template that fails to
/// render degrades to plain placeholder substitution.
pub fn render_booking_confirmed(language: Language, name: &str, time: &str) -> String {
    let template = catalog(language).booking_confirmed;
    let mut context = Context::new();
    context.insert("name", name);
    context.insert("time", time);

    match Tera::one_off(template, &context, false) {
        Ok(rendered) => rendered,
        Err(error) => {
            warn!(
                event_name = "locale.template.render_failed",
                language = language.as_str(),
                error = %error,
                "booking confirmation template failed to render"
            );
            template.replace("{{ name }}", name).replace("{{ time }}", time)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{catalog, render_booking_confirmed, sentence_enders};
    use crate::language::Language;

    #[test]
    fn unsupported_catalog_languages_fall_back_to_english() {
        assert_eq!(catalog(Language::Ru), catalog(Language::En));
        assert_eq!(catalog(Language::Zh).rephrase, catalog(Language::En).rephrase);
        assert_ne!(catalog(Language::Ko).rephrase, catalog(Language::En).rephrase);
    }

    #[test]
    fn booking_template_fills_name_and_time() {
        let rendered = render_booking_confirmed(Language::Ko, "김민지", "2026년 3월 3일 오후 2:00");

        assert!(rendered.starts_with("김민지님의 예약이 완료되었습니다!"));
        assert!(rendered.contains("예약 시간: 2026년 3월 3일 오후 2:00"));
    }

    #[test]
    fn korean_enders_keep_generic_punctuation_last() {
        let enders = sentence_enders(Language::Ko);
        assert_eq!(enders.last(), Some(&"?"));
        assert!(enders.iter().position(|e| *e == "했습니다.") < enders.iter().position(|e| *e == "."));
        assert_eq!(sentence_enders(Language::Es), sentence_enders(Language::En));
    }
}
