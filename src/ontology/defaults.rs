//! Built-in service and field descriptions, used when the description
//! directory has no files. Same format as the on-disk description files.

pub const DEFAULT_SERVICES: &str = "\
[Files]
Database=file
Enabled=true
Embedded=true
HasMetadata=true
HasFullText=true
ShowServiceFiles=true
ShowServiceDirectories=true
ContentMetadata=File:Contents
TabularMetadata=File:Name;File:Ext;File:Modified

[Folders]
Parent=Files
Database=file
Enabled=true
Embedded=true
HasMetadata=true
ShowServiceDirectories=true
Mimes=inode/directory

[Documents]
Parent=Files
Database=file
Enabled=true
Embedded=true
HasMetadata=true
HasFullText=true
HasThumbs=true
Mimes=application/pdf;application/postscript;application/msword;application/vnd.oasis.opendocument.text
ContentMetadata=File:Contents

[Images]
Parent=Files
Database=file
Enabled=true
Embedded=true
HasMetadata=true
HasThumbs=true
MimePrefixes=image/

[Music]
Parent=Files
Database=file
Enabled=true
Embedded=true
HasMetadata=true
MimePrefixes=audio/

[Videos]
Parent=Files
Database=file
Enabled=true
Embedded=true
HasMetadata=true
HasThumbs=true
MimePrefixes=video/

[Text]
Parent=Files
Database=file
Enabled=true
Embedded=true
HasFullText=true
MimePrefixes=text/
Mimes=text/plain
ContentMetadata=File:Contents

[Development]
Parent=Files
Database=file
Enabled=true
Embedded=true
HasFullText=true
Mimes=text/x-csrc;text/x-chdr;text/x-c++src;text/x-python;text/x-rust;application/x-shellscript
ContentMetadata=File:Contents

[Other]
Parent=Files
Database=file
Enabled=true
Embedded=true

[Applications]
Database=file
Enabled=true
Embedded=true
HasMetadata=true
Mimes=application/x-desktop

[Emails]
Database=email
Enabled=true
Embedded=true
HasMetadata=true
HasFullText=true
ContentMetadata=Email:Body
TabularMetadata=Email:Subject;Email:Sender;Email:Date

[EvolutionEmails]
Parent=Emails
Database=email
Enabled=true
Embedded=true
HasMetadata=true
HasFullText=true
ContentMetadata=Email:Body

[ModestEmails]
Parent=Emails
Database=email
Enabled=true
Embedded=true
HasMetadata=true
HasFullText=true
ContentMetadata=Email:Body

[ThunderbirdEmails]
Parent=Emails
Database=email
Enabled=true
Embedded=true
HasMetadata=true
HasFullText=true
ContentMetadata=Email:Body

[Conversations]
Database=file
Enabled=true
Embedded=true
HasFullText=true
ContentMetadata=File:Contents

[GaimConversations]
Parent=Conversations
Database=file
Enabled=true
Embedded=true
HasFullText=true
ContentMetadata=File:Contents
";

pub const DEFAULT_FIELDS: &str = "\
[File:Name]
DataType=Index
Weight=20
Embedded=true

[File:Path]
DataType=Index
Weight=1
Embedded=true

[File:Ext]
DataType=Index
Weight=15
Embedded=true

[File:Link]
DataType=String
Embedded=true

[File:Mime]
DataType=Keyword
Weight=10
Embedded=true

[File:Size]
DataType=Integer
Embedded=true

[File:Modified]
DataType=Date
Embedded=true

[File:Accessed]
DataType=Date
Embedded=true

[File:Contents]
DataType=FullText
Weight=1
Embedded=true

[File:Keywords]
DataType=Keyword
Weight=50
Embedded=false
MultipleValues=true

[Email:Subject]
DataType=Index
Weight=30
Embedded=true
Parents=File:Name

[Email:Sender]
DataType=Index
Weight=20
Embedded=true

[Email:Recipient]
DataType=Index
Weight=10
Embedded=true
MultipleValues=true

[Email:Date]
DataType=Date
Embedded=true
Parents=File:Modified

[Email:Body]
DataType=FullText
Weight=1
Embedded=true

[Email:Attachments]
DataType=Index
Weight=5
Embedded=true
MultipleValues=true
";

/// Xesam field name -> native field names, seeded into `xesam.db` and used
/// by the structured query translator.
pub const DEFAULT_XESAM_FIELDS: &[(&str, &[&str])] = &[
    ("File:Name", &["File:Name"]),
    ("File:Path", &["File:Path"]),
    ("File:Ext", &["File:Ext"]),
    ("File:Mime", &["File:Mime"]),
    ("File:Size", &["File:Size"]),
    ("File:Modified", &["File:Modified"]),
    ("File:Contents", &["File:Contents"]),
    ("xesam:name", &["File:Name"]),
    ("xesam:url", &["File:Path"]),
    ("xesam:mimeType", &["File:Mime"]),
    ("xesam:size", &["File:Size"]),
    ("xesam:contentModified", &["File:Modified", "Email:Date"]),
    ("xesam:title", &["File:Name", "Email:Subject"]),
    ("xesam:author", &["Email:Sender"]),
    ("xesam:plainTextContent", &["File:Contents", "Email:Body"]),
];

/// Xesam class name -> native service name.
pub const DEFAULT_XESAM_SERVICES: &[(&str, &str)] = &[
    ("Files", "Files"),
    ("Emails", "Emails"),
    ("Conversations", "Conversations"),
    ("xesam:File", "Files"),
    ("xesam:Document", "Documents"),
    ("xesam:Image", "Images"),
    ("xesam:Audio", "Music"),
    ("xesam:Video", "Videos"),
    ("xesam:Email", "Emails"),
    ("xesam:Content", "Files"),
];
